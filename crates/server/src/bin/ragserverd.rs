//! The HTTP surface: an axum router over a single `Arc<ragcore::Engine>`,
//! implementing the routes in §6. Grounded on the teacher's
//! `discord_http_server.rs` (`AxumState`, `Router`, CORS layer, JSON bodies).

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Multipart, Path as AxumPath, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use ragcore::config::{RagConfig, SearchConfig};
use ragcore::error::RagError;
use ragcore::modelclient::chat::ChatTurn;
use ragcore::Engine;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

struct ApiError(RagError);

impl From<RagError> for ApiError {
    fn from(err: RagError) -> Self {
        Self(err)
    }
}

/// `DimensionMismatch` -> 422, `UnknownModel` -> 400 with a structured body,
/// everything else -> 500, per §7.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            RagError::DimensionMismatch { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            RagError::UnknownModel(_) => StatusCode::BAD_REQUEST,
            RagError::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config_path = std::env::var("RAGSERVER_CONFIG")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| RagConfig::default().data_dir.join("config.json"));
    let config = RagConfig::load_or_default(&config_path).map_err(anyhow::Error::msg)?;
    config.validate().map_err(anyhow::Error::msg)?;

    let data_dir = config.data_dir.clone();
    let engine = Arc::new(Engine::open(config).await?);

    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/ingest", post(ingest))
        .route("/query", post(query))
        .route("/debug/retrieval", post(debug_retrieval))
        .route("/debug/citations", post(debug_citations))
        .route("/chunks/:id", get(get_chunk))
        .route("/models", get(list_models).post(set_models))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(engine.clone());

    let raw_dir = data_dir.join("raw");
    std::fs::create_dir_all(&raw_dir)?;

    let addr: SocketAddr = std::env::var("RAGSERVER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8787".to_string())
        .parse()?;
    tracing::info!(%addr, data_dir = %data_dir.display(), "starting ragserverd");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn stats(AxumState(engine): AxumState<Arc<Engine>>) -> Result<Json<serde_json::Value>, ApiError> {
    let stats = engine.stats().await?;
    Ok(Json(serde_json::json!({
        "chunk_store": {
            "documents": stats.documents,
            "chunks": stats.chunks,
            "fts_entries": stats.lexical_docs,
        },
        "vector_index": {
            "exists": stats.vectors > 0,
            "ntotal": stats.vectors,
            "dim": engine.vector.dimension(),
            "type": "lancedb(FixedSizeList<Float32>, Cosine)",
            "trained": engine.vector.is_trained(),
            "size_bytes": engine.vector.size_bytes(),
        },
        "accelerator": {
            "build_has_gpu": ragcore::storage::vector_index::build_has_gpu_support(),
            "devices_visible": ragcore::storage::vector_index::device_visible(),
        },
        "active_models": {
            "chat": engine.models.current_chat().model_name(),
            "embed": engine.models.current_embed().model_name(),
            "base_url": engine.config.model_service.base_url,
            "num_predict": engine.config.model_service.num_predict,
            "chunk_size": engine.config.chunking.chunk_size,
            "chunk_overlap": engine.config.chunking.chunk_overlap,
        },
    })))
}

async fn ingest(
    AxumState(engine): AxumState<Arc<Engine>>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut received = Vec::new();
    let mut documents_added = 0usize;
    let mut chunks_added = 0usize;
    let mut vectors_added = 0usize;
    let mut skipped = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| RagError::Other(e.to_string()))? {
        let filename = field.file_name().unwrap_or("upload.bin").to_string();
        let content_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        let bytes = field.bytes().await.map_err(|e| RagError::Other(e.to_string()))?;

        let stored_path = engine
            .config
            .data_dir
            .join("raw")
            .join(format!("{}_{}", uuid::Uuid::new_v4(), filename))
            .display()
            .to_string();
        std::fs::write(&stored_path, &bytes).map_err(RagError::Io)?;

        received.push(filename.clone());
        match engine.ingest(&filename, &content_type, &stored_path, &bytes).await? {
            ragcore::types::IngestOutcome::Added { chunks_added: c, .. } => {
                documents_added += 1;
                chunks_added += c;
                vectors_added += c;
            }
            ragcore::types::IngestOutcome::Duplicate { filename, .. } => skipped.push(filename),
        }
    }

    Ok(Json(serde_json::json!({
        "received": received,
        "documents_added": documents_added,
        "chunks_added": chunks_added,
        "vectors_added": vectors_added,
        "skipped": skipped,
    })))
}

#[derive(Deserialize)]
struct QueryRequest {
    session_id: Option<String>,
    query: String,
    bm25_k: Option<usize>,
    vec_k: Option<usize>,
    top_k: Option<usize>,
    memory_k: Option<usize>,
}

fn override_search(engine: &Engine, req: &QueryRequest) -> Option<SearchConfig> {
    if req.bm25_k.is_none() && req.vec_k.is_none() && req.top_k.is_none() && req.memory_k.is_none() {
        return None;
    }
    let mut search = engine.config.search.clone();
    if let Some(v) = req.bm25_k {
        search.bm25_k = v;
    }
    if let Some(v) = req.vec_k {
        search.vec_k = v;
    }
    if let Some(v) = req.top_k {
        search.final_k = v;
    }
    if let Some(v) = req.memory_k {
        search.memory_k = v;
    }
    Some(search)
}

async fn query(
    AxumState(engine): AxumState<Arc<Engine>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let search_override = override_search(&engine, &req);
    let history: Vec<ChatTurn> = match &req.session_id {
        Some(id) => engine.recent_history(id)?,
        None => Vec::new(),
    };

    let answer = engine
        .query(&req.query, req.session_id.as_deref(), &history, search_override.as_ref())
        .await?;

    Ok(Json(serde_json::json!({
        "answer": answer.answer,
        "sources": answer.sources,
        "debug": answer.debug,
    })))
}

async fn debug_retrieval(
    AxumState(engine): AxumState<Arc<Engine>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let search_override = override_search(&engine, &req);
    let search_config = search_override.as_ref().unwrap_or(&engine.config.search);
    let result = engine.debug_retrieval(&req.query, search_override.as_ref()).await?;

    let lexical_ids: std::collections::HashSet<i64> = result.lexical_hits.iter().map(|(id, _)| *id).collect();
    let vector_ids: std::collections::HashSet<i64> = result.vector_hits.iter().map(|(id, _)| *id).collect();
    let overlap_count = lexical_ids.intersection(&vector_ids).count();

    Ok(Json(serde_json::json!({
        "lexical_hit_count": result.lexical_hit_count,
        "vector_hit_count": result.vector_hit_count,
        "lexical_hits": result.lexical_hits,
        "vector_hits": result.vector_hits,
        "fused": result.fused,
        "chunks": result.chunks,
        "overlap": {
            "lexical_only": lexical_ids.len() - overlap_count,
            "vector_only": vector_ids.len() - overlap_count,
            "both": overlap_count,
        },
        "rrf_params": {
            "rrf_k": search_config.rrf_k,
            "w_lex": search_config.w_lex,
            "w_vec": search_config.w_vec,
        },
        "timings_ms": result.timings,
        "dimension_mismatch": result.dimension_mismatch,
    })))
}

async fn debug_citations(
    AxumState(engine): AxumState<Arc<Engine>>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let search_override = override_search(&engine, &req);
    let history: Vec<ChatTurn> = match &req.session_id {
        Some(id) => engine.recent_history(id)?,
        None => Vec::new(),
    };
    let answer = engine
        .query(&req.query, None, &history, search_override.as_ref())
        .await?;
    Ok(Json(serde_json::json!({
        "answer": answer.answer,
        "citation_report": answer.debug.citation_report,
    })))
}

async fn get_chunk(
    AxumState(engine): AxumState<Arc<Engine>>,
    AxumPath(id): AxumPath<i64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let hits = engine.chunk_store.fetch_chunks_by_ids(&[id])?;
    match hits.into_iter().next() {
        Some(c) => Ok(Json(serde_json::json!({
            "chunk_id": c.chunk.id,
            "document_id": c.chunk.document_id,
            "filename": c.filename,
            "chunk_index": c.chunk.chunk_index,
            "metadata": c.chunk.metadata,
            "text": c.chunk.text,
        }))),
        None => Err(ApiError(RagError::NotFound(format!("no chunk with id {id}")))),
    }
}

async fn list_models(AxumState(engine): AxumState<Arc<Engine>>) -> Json<serde_json::Value> {
    let tags_url = format!("{}/api/tags", engine.config.model_service.base_url);
    let all = match reqwest::get(&tags_url).await {
        Ok(resp) => resp.json::<serde_json::Value>().await.ok(),
        Err(_) => None,
    };

    Json(serde_json::json!({
        "current": {
            "chat": engine.models.current_chat().model_name(),
            "embed": engine.models.current_embed().model_name(),
        },
        "available": all.unwrap_or_else(|| serde_json::json!({"models": []})),
    }))
}

#[derive(Deserialize)]
struct SetModelsRequest {
    chat_model: Option<String>,
    embed_model: Option<String>,
}

#[derive(Serialize)]
struct ModelsChanged {
    chat_model: Option<ragcore::modelclient::registry::ModelChange>,
    embed_model: Option<ragcore::modelclient::registry::ModelChange>,
}

async fn set_models(
    AxumState(engine): AxumState<Arc<Engine>>,
    Json(req): Json<SetModelsRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut changes = ModelsChanged {
        chat_model: None,
        embed_model: None,
    };

    if let Some(model) = &req.chat_model {
        changes.chat_model = Some(engine.models.set_chat_model(model).await?);
    }
    if let Some(model) = &req.embed_model {
        changes.embed_model = Some(engine.models.set_embed_model(model, &engine.vector).await?);
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "changes": changes,
        "current": {
            "chat": engine.models.current_chat().model_name(),
            "embed": engine.models.current_embed().model_name(),
        },
    })))
}
