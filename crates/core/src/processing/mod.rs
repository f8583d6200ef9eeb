pub mod chunker;
pub mod extract;

pub use chunker::{TextChunk, TextChunker};
pub use extract::{extract, ExtractedText};
