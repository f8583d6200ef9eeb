//! Core data model (§3): documents, chunks, chat messages, and the records
//! that move between the chunk store, the lexical index, and the vector
//! index. `Chunk::id` is the identifier shared across all three stores.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub sha256: String,
    pub content_type: String,
    pub stored_path: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: u32,
    pub text: String,
    /// Free-form extraction metadata, e.g. `{"type": "pdf", "pages": 12}`.
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: i64,
}

/// A chunk joined with its owning document, the shape `fetch_chunks_by_ids`
/// returns to the retriever and assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkWithSource {
    pub chunk: Chunk,
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatRole::System => "system",
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: String,
    pub role: ChatRole,
    pub content: String,
    pub sequence: i64,
    pub created_at: i64,
}

/// A chunk id after RRF fusion, carrying its fused score and the per-source
/// ranks that produced it (for the `/debug/retrieval` surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedHit {
    pub chunk_id: i64,
    pub fused_score: f32,
    pub lexical_rank: Option<usize>,
    pub vector_rank: Option<usize>,
}

/// A fully hydrated retrieval result ready for prompt assembly or the
/// `/query` response's `sources` field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub filename: String,
    pub chunk_index: u32,
    pub text: String,
    pub fused_score: f32,
}

/// Outcome of a single file's ingestion (§4.6, the `skipped` vs. `added`
/// distinction spec.md's Data Model invariant 2 requires).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IngestOutcome {
    Added {
        document_id: i64,
        chunks_added: usize,
    },
    Duplicate {
        filename: String,
        existing_document_id: i64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestSummary {
    pub documents_added: usize,
    pub chunks_added: usize,
    pub vectors_added: usize,
    pub skipped: Vec<String>,
}
