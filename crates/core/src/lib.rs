pub mod assemble;
pub mod config;
pub mod error;
pub mod ingest;
pub mod modelclient;
pub mod processing;
pub mod retrieval;
pub mod search;
pub mod storage;
pub mod types;

use std::sync::Arc;

use chrono::Utc;

use crate::assemble::{AssembledAnswer, Assembler};
use crate::config::{RagConfig, SearchConfig};
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::modelclient::chat::ChatTurn;
use crate::modelclient::ModelRegistry;
use crate::retrieval::{RetrievalResult, Retriever};
use crate::search::lexical::LexicalIndex;
use crate::storage::{ChunkStore, VectorIndex};
use crate::types::{ChatRole, IngestOutcome};

/// The whole service wired up: C1-C9 behind one handle that `ragserverd`'s
/// handlers and `ragctl`'s local commands both hold an `Arc` of.
pub struct Engine {
    pub config: RagConfig,
    pub chunk_store: Arc<ChunkStore>,
    pub lexical: Arc<LexicalIndex>,
    pub vector: Arc<VectorIndex>,
    pub models: Arc<ModelRegistry>,
    retriever: Retriever,
    ingestor: Ingestor,
    assembler: Assembler,
}

impl Engine {
    pub async fn open(config: RagConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        let chunk_store = Arc::new(ChunkStore::open(&config.data_dir.join("chunks.sqlite3"))?);
        let lexical = Arc::new(LexicalIndex::open_or_create(&config.data_dir.join("lexical"))?);
        let vector = Arc::new(VectorIndex::open_or_create(config.data_dir.join("vectors").to_str().unwrap()).await?);

        let model_config_path = config.data_dir.join("model_config.json");
        let persisted = crate::config::PersistedModelConfig::load_or(
            &model_config_path,
            &config.model_service.chat_model,
            &config.model_service.embed_model,
        );
        let models = Arc::new(ModelRegistry::new(
            config.model_service.base_url.clone(),
            config.model_service.request_timeout_secs,
            model_config_path,
            &persisted.chat_model,
            &persisted.embed_model,
        )?);

        let retriever = Retriever::new(chunk_store.clone(), lexical.clone(), vector.clone());
        let ingestor = Ingestor::new(chunk_store.clone(), lexical.clone(), vector.clone());
        let assembler = Assembler::new(&config.citation);

        Ok(Self {
            config,
            chunk_store,
            lexical,
            vector,
            models,
            retriever,
            ingestor,
            assembler,
        })
    }

    pub async fn ingest(
        &self,
        filename: &str,
        content_type: &str,
        stored_path: &str,
        bytes: &[u8],
    ) -> Result<IngestOutcome> {
        let embed_client = self.models.current_embed();
        self.ingestor
            .ingest_file(
                filename,
                content_type,
                stored_path,
                bytes,
                embed_client.as_ref(),
                &self.config.chunking,
                Utc::now().timestamp(),
            )
            .await
    }

    /// Retrieve, assemble, and log a question/answer turn for a chat
    /// session. `history` is the prior turns of the same session, oldest
    /// first, already trimmed to `search.memory_k`. `search_override`
    /// lets a single request tune `bm25_k`/`vec_k`/`top_k`/`memory_k`
    /// without touching the engine's persistent config.
    pub async fn query(
        &self,
        question: &str,
        session_id: Option<&str>,
        history: &[ChatTurn],
        search_override: Option<&SearchConfig>,
    ) -> Result<AssembledAnswer> {
        let embed_client = self.models.current_embed();
        let chat_client = self.models.current_chat();
        let search_config = search_override.unwrap_or(&self.config.search);

        let retrieval = self
            .retriever
            .retrieve(question, embed_client.as_ref(), search_config)
            .await?;

        let answer = self
            .assembler
            .assemble(
                question,
                &retrieval.chunks,
                history,
                chat_client.as_ref(),
                0.2,
                self.config.model_service.num_predict,
                retrieval.lexical_hit_count,
                retrieval.vector_hit_count,
                retrieval.dimension_mismatch,
            )
            .await?;

        if let Some(session_id) = session_id {
            let now = Utc::now().timestamp();
            self.chunk_store
                .append_chat_message(session_id, ChatRole::User, question, now)?;
            self.chunk_store
                .append_chat_message(session_id, ChatRole::Assistant, &answer.answer, now)?;
        }

        Ok(answer)
    }

    /// Run just the retrieval half of `query`, for the `/debug/retrieval`
    /// surface — no chat model call, no chat log entries.
    pub async fn debug_retrieval(&self, question: &str, search_override: Option<&SearchConfig>) -> Result<RetrievalResult> {
        let embed_client = self.models.current_embed();
        let search_config = search_override.unwrap_or(&self.config.search);
        self.retriever.retrieve(question, embed_client.as_ref(), search_config).await
    }

    pub fn recent_history(&self, session_id: &str) -> Result<Vec<ChatTurn>> {
        let messages = self
            .chunk_store
            .recent_chat_messages(session_id, self.config.search.memory_k)?;
        Ok(messages
            .into_iter()
            .map(|m| ChatTurn::new(m.role, m.content))
            .collect())
    }

    pub async fn stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            documents: self.chunk_store.document_count()?,
            chunks: self.chunk_store.chunk_count()?,
            vectors: self.vector.count().await?,
            lexical_docs: self.lexical.count()?,
        })
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub documents: usize,
    pub chunks: usize,
    pub vectors: usize,
    pub lexical_docs: usize,
}
