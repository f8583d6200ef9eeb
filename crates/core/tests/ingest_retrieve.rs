//! Integration coverage for the full ingest -> retrieve path (§8): dedup,
//! the no-hit/empty-index boundary cases, and determinism across repeated
//! queries against a temp data directory.

use std::sync::Arc;

use ragcore::config::{ChunkingConfig, SearchConfig};
use ragcore::ingest::Ingestor;
use ragcore::modelclient::EmbeddingClient;
use ragcore::retrieval::Retriever;
use ragcore::search::lexical::LexicalIndex;
use ragcore::storage::{ChunkStore, VectorIndex};
use ragcore::types::IngestOutcome;

struct DeterministicEmbedder;

#[async_trait::async_trait]
impl EmbeddingClient for DeterministicEmbedder {
    async fn embed(&self, text: &str) -> ragcore::error::Result<Vec<f32>> {
        // A tiny bag-of-words embedding: presence of "rust" vs "python" on
        // two axes, so retrieval has something meaningful to distinguish.
        let lower = text.to_lowercase();
        let rust = if lower.contains("rust") { 1.0 } else { 0.0 };
        let python = if lower.contains("python") { 1.0 } else { 0.0 };
        Ok(vec![rust, python, 0.1])
    }
    fn model_name(&self) -> &str {
        "deterministic-test-embedder"
    }
}

async fn harness() -> (Ingestor, Retriever, Arc<ChunkStore>) {
    let chunk_store = Arc::new(ChunkStore::open_in_memory().unwrap());
    let lexical = Arc::new(LexicalIndex::open_in_ram().unwrap());
    let dir = tempfile::tempdir().unwrap();
    let vector = Arc::new(VectorIndex::open_or_create(dir.path().to_str().unwrap()).await.unwrap());

    let ingestor = Ingestor::new(chunk_store.clone(), lexical.clone(), vector.clone());
    let retriever = Retriever::new(chunk_store.clone(), lexical, vector);
    (ingestor, retriever, chunk_store)
}

fn chunking() -> ChunkingConfig {
    ChunkingConfig {
        chunk_size: 200,
        chunk_overlap: 20,
    }
}

fn search() -> SearchConfig {
    SearchConfig {
        bm25_k: 10,
        vec_k: 10,
        final_k: 5,
        bm25_mode: "heuristic".to_string(),
        bm25_max_terms: 10,
        rrf_k: 60,
        w_lex: 1.0,
        w_vec: 1.0,
        memory_k: 6,
    }
}

#[tokio::test]
async fn querying_an_empty_corpus_returns_no_chunks() {
    let (_, retriever, _) = harness().await;
    let result = retriever.retrieve("anything at all", &DeterministicEmbedder, &search()).await.unwrap();
    assert!(result.chunks.is_empty());
    assert_eq!(result.lexical_hit_count, 0);
    assert_eq!(result.vector_hit_count, 0);
}

#[tokio::test]
async fn reingesting_the_same_bytes_is_a_no_op_duplicate() {
    let (ingestor, _, chunk_store) = harness().await;
    let bytes = b"Rust's ownership model prevents data races at compile time.";

    let first = ingestor
        .ingest_file("ownership.txt", "text/plain", "/raw/ownership.txt", bytes, &DeterministicEmbedder, &chunking(), 0)
        .await
        .unwrap();
    let first_doc_id = match first {
        IngestOutcome::Added { document_id, .. } => document_id,
        IngestOutcome::Duplicate { .. } => panic!("first ingest must not be a duplicate"),
    };

    let second = ingestor
        .ingest_file("ownership-copy.txt", "text/plain", "/raw/ownership-copy.txt", bytes, &DeterministicEmbedder, &chunking(), 1)
        .await
        .unwrap();
    match second {
        IngestOutcome::Duplicate { existing_document_id, .. } => assert_eq!(existing_document_id, first_doc_id),
        IngestOutcome::Added { .. } => panic!("re-ingesting identical bytes must be a duplicate"),
    }
    assert_eq!(chunk_store.document_count().unwrap(), 1);
}

#[tokio::test]
async fn retrieval_favors_the_topically_closer_document() {
    let (ingestor, retriever, _) = harness().await;

    ingestor
        .ingest_file(
            "rust.txt",
            "text/plain",
            "/raw/rust.txt",
            b"Rust ownership and borrowing explained in depth for systems programmers.",
            &DeterministicEmbedder,
            &chunking(),
            0,
        )
        .await
        .unwrap();
    ingestor
        .ingest_file(
            "python.txt",
            "text/plain",
            "/raw/python.txt",
            b"Python dynamic typing and duck typing explained for beginners.",
            &DeterministicEmbedder,
            &chunking(),
            1,
        )
        .await
        .unwrap();

    let result = retriever.retrieve("rust ownership borrowing", &DeterministicEmbedder, &search()).await.unwrap();
    assert!(!result.chunks.is_empty());
    assert!(result.chunks[0].filename == "rust.txt");
}

#[tokio::test]
async fn repeated_identical_queries_return_the_same_ranking() {
    let (ingestor, retriever, _) = harness().await;
    for i in 0..3 {
        ingestor
            .ingest_file(
                &format!("doc{i}.txt"),
                "text/plain",
                &format!("/raw/doc{i}.txt"),
                format!("document number {i} about rust and python").as_bytes(),
                &DeterministicEmbedder,
                &chunking(),
                i as i64,
            )
            .await
            .unwrap();
    }

    let first = retriever.retrieve("rust python", &DeterministicEmbedder, &search()).await.unwrap();
    let second = retriever.retrieve("rust python", &DeterministicEmbedder, &search()).await.unwrap();

    let ids_a: Vec<i64> = first.chunks.iter().map(|c| c.chunk_id).collect();
    let ids_b: Vec<i64> = second.chunks.iter().map(|c| c.chunk_id).collect();
    assert_eq!(ids_a, ids_b);
}
