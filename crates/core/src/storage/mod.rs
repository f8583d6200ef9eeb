pub mod chunk_store;
pub mod vector_index;

pub use chunk_store::ChunkStore;
pub use vector_index::VectorIndex;
