//! C6: ingestion pipeline. Hash, dedupe, extract, chunk, persist, embed,
//! and index a single file — the write path every other module's read
//! path depends on. Grounded on `ingest.py`'s `ingest_files` stage order.

use std::collections::HashMap;
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::modelclient::embedding::EmbeddingClient;
use crate::processing::{extract, TextChunker};
use crate::search::lexical::LexicalIndex;
use crate::storage::{ChunkStore, VectorIndex};
use crate::types::IngestOutcome;

pub struct Ingestor {
    chunk_store: Arc<ChunkStore>,
    lexical: Arc<LexicalIndex>,
    vector: Arc<VectorIndex>,
}

impl Ingestor {
    pub fn new(chunk_store: Arc<ChunkStore>, lexical: Arc<LexicalIndex>, vector: Arc<VectorIndex>) -> Self {
        Self {
            chunk_store,
            lexical,
            vector,
        }
    }

    /// Ingest one file's raw bytes. Returns `Duplicate` without touching any
    /// store when the content hash already has a document (invariant 1).
    pub async fn ingest_file(
        &self,
        filename: &str,
        content_type: &str,
        stored_path: &str,
        bytes: &[u8],
        embed_client: &dyn EmbeddingClient,
        chunking: &ChunkingConfig,
        created_at: i64,
    ) -> Result<IngestOutcome> {
        let sha256 = hex::encode(Sha256::digest(bytes));

        if let Some(existing) = self.chunk_store.find_document_by_sha256(&sha256)? {
            return Ok(IngestOutcome::Duplicate {
                filename: filename.to_string(),
                existing_document_id: existing.id,
            });
        }

        let extracted = extract(bytes, content_type)?;
        let chunker = TextChunker::new(chunking.chunk_size, chunking.chunk_overlap);
        let text_chunks = chunker.chunk(&extracted.text);

        let chunk_texts: Vec<String> = text_chunks.iter().map(|c| c.text.clone()).collect();
        let chunk_metadata: Vec<HashMap<String, serde_json::Value>> = text_chunks
            .iter()
            .map(|c| {
                let mut meta = extracted.metadata.clone();
                meta.insert("filename".to_string(), serde_json::Value::String(filename.to_string()));
                meta.insert("chunk_index".to_string(), serde_json::Value::from(c.index));
                meta
            })
            .collect();

        let (document_id, chunk_ids) = self.chunk_store.insert_document_with_chunks(
            filename,
            &sha256,
            content_type,
            stored_path,
            created_at,
            &chunk_texts,
            &chunk_metadata,
        )?;

        if chunk_ids.is_empty() {
            return Ok(IngestOutcome::Added {
                document_id,
                chunks_added: 0,
            });
        }

        let vectors = embed_client.embed_batch(&chunk_texts).await?;
        self.vector.add(&chunk_ids, &vectors).await?;

        let lexical_pairs: Vec<(i64, String)> = chunk_ids.iter().copied().zip(chunk_texts.into_iter()).collect();
        self.lexical.index_chunks(&lexical_pairs)?;
        self.lexical.commit()?;

        Ok(IngestOutcome::Added {
            document_id,
            chunks_added: chunk_ids.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;

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

    fn chunking() -> ChunkingConfig {
        ChunkingConfig {
            chunk_size: 1000,
            chunk_overlap: 150,
        }
    }

    async fn build_ingestor() -> (Ingestor, Arc<ChunkStore>) {
        let chunk_store = Arc::new(ChunkStore::open_in_memory().unwrap());
        let lexical = Arc::new(LexicalIndex::open_in_ram().unwrap());
        let dir = tempfile::tempdir().unwrap();
        let vector = Arc::new(VectorIndex::open_or_create(dir.path().to_str().unwrap()).await.unwrap());
        let ingestor = Ingestor::new(chunk_store.clone(), lexical, vector);
        (ingestor, chunk_store)
    }

    #[tokio::test]
    async fn ingesting_new_content_adds_chunks_and_vectors() {
        let (ingestor, chunk_store) = build_ingestor().await;
        let outcome = ingestor
            .ingest_file(
                "notes.txt",
                "text/plain",
                "/raw/notes.txt",
                b"rust ownership explained in detail",
                &FakeEmbedder,
                &chunking(),
                0,
            )
            .await
            .unwrap();

        match outcome {
            IngestOutcome::Added { chunks_added, .. } => assert_eq!(chunks_added, 1),
            IngestOutcome::Duplicate { .. } => panic!("expected Added"),
        }
        assert_eq!(chunk_store.document_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn chunk_metadata_carries_filename_and_chunk_index() {
        let (ingestor, chunk_store) = build_ingestor().await;
        let outcome = ingestor
            .ingest_file(
                "notes.txt",
                "text/plain",
                "/raw/notes.txt",
                b"rust ownership explained in detail",
                &FakeEmbedder,
                &chunking(),
                0,
            )
            .await
            .unwrap();

        assert!(matches!(outcome, IngestOutcome::Added { .. }));
        // a fresh in-memory store assigns sequential rowids starting at 1,
        // so the document's lone chunk has id 1.
        let chunks = chunk_store.fetch_chunks_by_ids(&[1]).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk.metadata.get("filename").unwrap(), "notes.txt");
        assert_eq!(chunks[0].chunk.metadata.get("chunk_index").unwrap(), 0);
    }

    #[tokio::test]
    async fn reingesting_identical_bytes_is_a_duplicate() {
        let (ingestor, chunk_store) = build_ingestor().await;
        let bytes: &[u8] = b"identical content";
        ingestor
            .ingest_file("a.txt", "text/plain", "/raw/a.txt", bytes, &FakeEmbedder, &chunking(), 0)
            .await
            .unwrap();
        let second = ingestor
            .ingest_file("b.txt", "text/plain", "/raw/b.txt", bytes, &FakeEmbedder, &chunking(), 1)
            .await
            .unwrap();

        assert!(matches!(second, IngestOutcome::Duplicate { .. }));
        assert_eq!(chunk_store.document_count().unwrap(), 1);
    }
}
