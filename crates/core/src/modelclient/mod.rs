pub mod chat;
pub mod embedding;
pub mod registry;

pub use chat::ChatClient;
pub use embedding::EmbeddingClient;
pub use registry::ModelRegistry;
