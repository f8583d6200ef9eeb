use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    pub data_dir: PathBuf,
    pub model_service: ModelServiceConfig,
    pub chunking: ChunkingConfig,
    pub search: SearchConfig,
    pub citation: CitationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelServiceConfig {
    pub base_url: String,
    pub chat_model: String,
    pub embed_model: String,
    pub num_predict: u32,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub bm25_k: usize,
    pub vec_k: usize,
    pub final_k: usize,
    pub bm25_mode: String,
    pub bm25_max_terms: usize,
    pub rrf_k: usize,
    pub w_lex: f32,
    pub w_vec: f32,
    pub memory_k: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitationConfig {
    pub min_unique_citations: usize,
    pub require_citation_per_paragraph: bool,
    pub rewrite_on_fail: bool,
}

impl RagConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunking.chunk_size < 50 {
            return Err("chunking.chunk_size must be >= 50".into());
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err("chunking.chunk_overlap must be < chunk_size".into());
        }
        if self.search.final_k == 0 {
            return Err("search.final_k must be > 0".into());
        }
        if self.search.bm25_k == 0 || self.search.vec_k == 0 {
            return Err("search.bm25_k and search.vec_k must be > 0".into());
        }
        if self.search.rrf_k == 0 {
            return Err("search.rrf_k must be > 0".into());
        }
        if self.citation.min_unique_citations == 0 {
            return Err("citation.min_unique_citations must be > 0".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for a missing file.
    pub fn load_or_default(path: &Path) -> Result<Self, String> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;
        std::fs::write(path, data).map_err(|e| format!("Failed to write config file: {}", e))
    }
}

impl Default for RagConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ragcore");

        Self {
            data_dir,
            model_service: ModelServiceConfig {
                base_url: "http://localhost:11434".to_string(),
                chat_model: "llama3.1".to_string(),
                embed_model: "nomic-embed-text".to_string(),
                num_predict: 1024,
                request_timeout_secs: 600,
            },
            chunking: ChunkingConfig {
                chunk_size: 1000,
                chunk_overlap: 150,
            },
            search: SearchConfig {
                bm25_k: 20,
                vec_k: 20,
                final_k: 8,
                bm25_mode: "heuristic".to_string(),
                bm25_max_terms: 10,
                rrf_k: 60,
                w_lex: 1.0,
                w_vec: 1.0,
                memory_k: 6,
            },
            citation: CitationConfig {
                min_unique_citations: 1,
                require_citation_per_paragraph: true,
                rewrite_on_fail: true,
            },
        }
    }
}

/// Persistent model-config record: one JSON object `{chat_model, embed_model}`
/// at the data root. Kept separate from `RagConfig` so the active model names
/// can be rewritten independently of the rest of the config by the model
/// registry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedModelConfig {
    pub chat_model: String,
    pub embed_model: String,
}

impl PersistedModelConfig {
    pub fn load_or(path: &Path, fallback_chat: &str, fallback_embed: &str) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            if let Ok(parsed) = serde_json::from_str::<Self>(&content) {
                return parsed;
            }
        }
        Self {
            chat_model: fallback_chat.to_string(),
            embed_model: fallback_embed.to_string(),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let data = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(path, data).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_ge_chunk_size() {
        let mut cfg = RagConfig::default();
        cfg.chunking.chunk_overlap = cfg.chunking.chunk_size;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_or_default_falls_back_on_missing_file() {
        let cfg = RagConfig::load_or_default(Path::new("/nonexistent/ragcore.json")).unwrap();
        assert_eq!(cfg.search.final_k, RagConfig::default().search.final_k);
    }
}
