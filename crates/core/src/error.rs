//! Error kinds per §7 of the design. Each component that can fail owns its
//! variant; `TransportFailure` wraps the underlying library errors so callers
//! can still match on kind without losing the original cause.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("vector index dimension mismatch: index is {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("model '{0}' not found")]
    UnknownModel(String),

    #[error("{0}")]
    NotFound(String),

    #[error("chunk store error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("lexical index error: {0}")]
    Lexical(#[from] tantivy::TantivyError),

    #[error("vector index error: {0}")]
    Vector(#[from] lancedb::Error),

    #[error("model service transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("pdf extraction error: {0}")]
    Pdf(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, RagError>;
