//! C7: the hybrid retriever. Runs the lexical and vector searches, fuses
//! the ranked id lists with RRF, and hydrates the fused chunk ids back into
//! full records for the answer assembler (or the `/debug/retrieval`
//! surface).

use std::sync::Arc;
use std::time::Instant;

use crate::config::SearchConfig;
use crate::error::{RagError, Result};
use crate::modelclient::embedding::EmbeddingClient;
use crate::search::lexical::{build_match, LexicalIndex, QueryMode};
use crate::search::fusion::reciprocal_rank_fusion;
use crate::storage::{ChunkStore, VectorIndex};
use crate::types::{FusedHit, RetrievedChunk};

/// Per-stage timings for the `/debug/retrieval` surface, millisecond
/// resolution per the teacher's own `Instant::now()`/`elapsed()` latency
/// instrumentation (`rag/llm_router.rs`).
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct RetrievalTimings {
    pub lexical_ms: u64,
    pub vector_ms: u64,
    pub fuse_ms: u64,
    pub total_ms: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RetrievalResult {
    pub chunks: Vec<RetrievedChunk>,
    pub fused: Vec<FusedHit>,
    pub lexical_hits: Vec<(i64, f32)>,
    pub vector_hits: Vec<(i64, f32)>,
    pub lexical_hit_count: usize,
    pub vector_hit_count: usize,
    /// Set when the vector search rejected the query embedding's width
    /// against the index's fixed dimension (§4.7/§8 scenario 5). Retrieval
    /// still succeeds, lexical-only, rather than failing the whole call.
    pub dimension_mismatch: bool,
    pub timings: RetrievalTimings,
}

pub struct Retriever {
    chunk_store: Arc<ChunkStore>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
}

impl Retriever {
    pub fn new(chunk_store: Arc<ChunkStore>, lexical: Arc<LexicalIndex>, vector: Arc<VectorIndex>) -> Self {
        Self {
            chunk_store,
            lexical,
            vector,
        }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        embed_client: &dyn EmbeddingClient,
        config: &SearchConfig,
    ) -> Result<RetrievalResult> {
        let mode = if config.bm25_mode == "raw" {
            QueryMode::Raw
        } else {
            QueryMode::Heuristic
        };
        let lexical_query = build_match(query, mode, config.bm25_max_terms);

        let total_start = Instant::now();

        let lexical_start = Instant::now();
        let lexical_hits = self.lexical.search(&lexical_query, config.bm25_k)?;
        let lexical_ms = lexical_start.elapsed().as_millis() as u64;

        let query_vector = embed_client.embed(query).await?;
        let vector_start = Instant::now();
        let (vector_hits, dimension_mismatch) = match self.vector.search(&query_vector, config.vec_k).await {
            Ok(hits) => (hits, false),
            Err(RagError::DimensionMismatch { expected, actual }) => {
                tracing::warn!(expected, actual, "vector search dimension mismatch, falling back to lexical-only");
                (Vec::new(), true)
            }
            Err(e) => return Err(e),
        };
        let vector_ms = vector_start.elapsed().as_millis() as u64;

        let fuse_start = Instant::now();
        let fused = reciprocal_rank_fusion(
            &lexical_hits,
            &vector_hits,
            config.rrf_k,
            config.w_lex,
            config.w_vec,
            config.final_k,
        );
        let fuse_ms = fuse_start.elapsed().as_millis() as u64;
        let total_ms = total_start.elapsed().as_millis() as u64;

        let ids: Vec<i64> = fused.iter().map(|h| h.chunk_id).collect();
        let hydrated = self.chunk_store.fetch_chunks_by_ids(&ids)?;

        let mut by_id = std::collections::HashMap::new();
        for chunk in hydrated {
            by_id.insert(chunk.chunk.id, chunk);
        }

        let chunks = fused
            .iter()
            .filter_map(|hit| {
                by_id.get(&hit.chunk_id).map(|c| RetrievedChunk {
                    chunk_id: hit.chunk_id,
                    filename: c.filename.clone(),
                    chunk_index: c.chunk.chunk_index,
                    text: c.chunk.text.clone(),
                    fused_score: hit.fused_score,
                })
            })
            .collect();

        Ok(RetrievalResult {
            chunks,
            fused,
            lexical_hit_count: lexical_hits.len(),
            vector_hit_count: vector_hits.len(),
            lexical_hits,
            vector_hits,
            dimension_mismatch,
            timings: RetrievalTimings {
                lexical_ms,
                vector_ms,
                fuse_ms,
                total_ms,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::lexical::LexicalIndex;
    use crate::storage::{ChunkStore, VectorIndex};
    use std::collections::HashMap as Map;

    struct FakeEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingClient for FakeEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0, 0.0])
        }
        fn model_name(&self) -> &str {
            "fake"
        }
    }

    #[tokio::test]
    async fn retrieval_returns_no_hits_against_empty_indexes() {
        let chunk_store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let lexical = Arc::new(LexicalIndex::open_in_ram().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorIndex::open_or_create(dir.path().to_str().unwrap()).await.unwrap());
        let retriever = Retriever::new(chunk_store, lexical, vector);

        let config = SearchConfig {
            bm25_k: 10,
            vec_k: 10,
            final_k: 5,
            bm25_mode: "heuristic".to_string(),
            bm25_max_terms: 10,
            rrf_k: 60,
            w_lex: 1.0,
            w_vec: 1.0,
            memory_k: 6,
        };
        let result = retriever.retrieve("anything", &FakeEmbedder, &config).await.unwrap();
        assert!(result.chunks.is_empty());
    }

    #[tokio::test]
    async fn retrieval_hydrates_fused_ids_with_chunk_text() {
        let chunk_store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let (_, chunk_ids) = chunk_store
            .insert_document_with_chunks(
                "doc.txt",
                "hash1",
                "text/plain",
                "/raw/hash1_doc.txt",
                0,
                &["rust ownership explained".to_string()],
                &[Map::new()],
            )
            .unwrap();

        let lexical = Arc::new(LexicalIndex::open_in_ram().unwrap());
        lexical
            .index_chunks(&[(chunk_ids[0], "rust ownership explained".to_string())])
            .unwrap();
        lexical.commit().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorIndex::open_or_create(dir.path().to_str().unwrap()).await.unwrap());
        vector.add(&[chunk_ids[0]], &[vec![1.0, 0.0, 0.0]]).await.unwrap();

        let retriever = Retriever::new(chunk_store, lexical, vector);
        let config = SearchConfig {
            bm25_k: 10,
            vec_k: 10,
            final_k: 5,
            bm25_mode: "heuristic".to_string(),
            bm25_max_terms: 10,
            rrf_k: 60,
            w_lex: 1.0,
            w_vec: 1.0,
            memory_k: 6,
        };
        let result = retriever.retrieve("rust ownership", &FakeEmbedder, &config).await.unwrap();
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].filename, "doc.txt");
    }

    #[tokio::test]
    async fn vector_dimension_mismatch_falls_back_to_lexical_only() {
        let chunk_store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let (_, chunk_ids) = chunk_store
            .insert_document_with_chunks(
                "doc.txt",
                "hash1",
                "text/plain",
                "/raw/hash1_doc.txt",
                0,
                &["rust ownership explained".to_string()],
                &[Map::new()],
            )
            .unwrap();

        let lexical = Arc::new(LexicalIndex::open_in_ram().unwrap());
        lexical
            .index_chunks(&[(chunk_ids[0], "rust ownership explained".to_string())])
            .unwrap();
        lexical.commit().unwrap();

        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorIndex::open_or_create(dir.path().to_str().unwrap()).await.unwrap());
        // Fix the index's dimension at 3, then query with a mismatched embedder (2 dims).
        vector.add(&[chunk_ids[0]], &[vec![1.0, 0.0, 0.0]]).await.unwrap();

        struct MismatchedEmbedder;
        #[async_trait::async_trait]
        impl EmbeddingClient for MismatchedEmbedder {
            async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
                Ok(vec![1.0, 0.0])
            }
            fn model_name(&self) -> &str {
                "mismatched"
            }
        }

        let retriever = Retriever::new(chunk_store, lexical, vector);
        let config = SearchConfig {
            bm25_k: 10,
            vec_k: 10,
            final_k: 5,
            bm25_mode: "heuristic".to_string(),
            bm25_max_terms: 10,
            rrf_k: 60,
            w_lex: 1.0,
            w_vec: 1.0,
            memory_k: 6,
        };
        let result = retriever
            .retrieve("rust ownership", &MismatchedEmbedder, &config)
            .await
            .unwrap();
        assert!(result.dimension_mismatch);
        assert!(result.vector_hits.is_empty());
        assert_eq!(result.chunks.len(), 1);
        assert_eq!(result.chunks[0].filename, "doc.txt");
    }
}
