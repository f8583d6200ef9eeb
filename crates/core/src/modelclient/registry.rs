//! C9: the active model-config registry. Holds the currently active chat
//! and embedding clients behind `parking_lot::RwLock<Arc<dyn Trait>>` so a
//! request can clone a stable `Arc` snapshot under a momentary read lock
//! even if a model switch lands mid-flight (the read-copy-update discipline
//! the design calls for). Probe-and-swap semantics are ported from
//! `routes_models.py`'s `update_models` handler.

use parking_lot::RwLock;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::PersistedModelConfig;
use crate::error::{RagError, Result};
use crate::modelclient::chat::{ChatClient, ChatTurn, OllamaChatClient};
use crate::modelclient::embedding::{EmbeddingClient, OllamaEmbeddingClient};
use crate::storage::VectorIndex;
use crate::types::ChatRole;

#[derive(Debug, Clone, Serialize)]
pub struct DimensionWarning {
    pub old_dimension: usize,
    pub new_dimension: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelChange {
    pub from: String,
    pub to: String,
    pub dimension_warning: Option<DimensionWarning>,
}

pub struct ModelRegistry {
    base_url: String,
    timeout_secs: u64,
    config_path: PathBuf,
    chat: RwLock<Arc<dyn ChatClient>>,
    embed: RwLock<Arc<dyn EmbeddingClient>>,
}

impl ModelRegistry {
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        config_path: PathBuf,
        chat_model: &str,
        embed_model: &str,
    ) -> Result<Self> {
        let base_url = base_url.into();
        let chat: Arc<dyn ChatClient> =
            Arc::new(OllamaChatClient::new(base_url.clone(), chat_model, timeout_secs)?);
        let embed: Arc<dyn EmbeddingClient> =
            Arc::new(OllamaEmbeddingClient::new(base_url.clone(), embed_model, timeout_secs)?);
        Ok(Self {
            base_url,
            timeout_secs,
            config_path,
            chat: RwLock::new(chat),
            embed: RwLock::new(embed),
        })
    }

    pub fn current_chat(&self) -> Arc<dyn ChatClient> {
        self.chat.read().clone()
    }

    pub fn current_embed(&self) -> Arc<dyn EmbeddingClient> {
        self.embed.read().clone()
    }

    /// Probe a candidate chat model with a minimal exchange. A "not found"
    /// / "does not exist" error rejects the switch as `UnknownModel`; any
    /// other transport error is treated as the model still warming up and
    /// the switch is accepted anyway.
    pub async fn set_chat_model(&self, model: &str) -> Result<ModelChange> {
        let candidate = OllamaChatClient::new(self.base_url.clone(), model, self.timeout_secs)?;
        let probe = candidate
            .chat(&[ChatTurn::new(ChatRole::User, "test")], 0.0, 8)
            .await;

        if let Err(RagError::UnknownModel(_)) = probe {
            return Err(RagError::UnknownModel(model.to_string()));
        }
        if let Err(e) = &probe {
            tracing::warn!(model, error = %e, "chat model probe failed, switching anyway (may still be loading)");
        }

        let old = self.chat.read().model_name().to_string();
        *self.chat.write() = Arc::new(candidate);
        self.persist_config(Some(model), None)?;

        Ok(ModelChange {
            from: old,
            to: model.to_string(),
            dimension_warning: None,
        })
    }

    /// Probe a candidate embedding model by embedding a fixed literal
    /// string to learn its output dimension, compare that against the
    /// vector index's persisted dimension, and attach a warning if they
    /// differ. The vector index itself is never touched here — per
    /// invariant 5 the operator resets it manually.
    pub async fn set_embed_model(&self, model: &str, vector_index: &VectorIndex) -> Result<ModelChange> {
        let candidate = OllamaEmbeddingClient::new(self.base_url.clone(), model, self.timeout_secs)?;
        let new_vector = candidate.embed("dimension probe").await?;
        let new_dimension = new_vector.len();

        let old = self.embed.read().model_name().to_string();
        let dimension_warning = vector_index.dimension().and_then(|old_dimension| {
            if old_dimension != new_dimension {
                Some(DimensionWarning {
                    old_dimension,
                    new_dimension,
                })
            } else {
                None
            }
        });

        *self.embed.write() = Arc::new(candidate);
        self.persist_config(None, Some(model))?;

        Ok(ModelChange {
            from: old,
            to: model.to_string(),
            dimension_warning,
        })
    }

    fn persist_config(&self, chat_model: Option<&str>, embed_model: Option<&str>) -> Result<()> {
        let mut current =
            PersistedModelConfig::load_or(&self.config_path, self.chat.read().model_name(), self.embed.read().model_name());
        if let Some(chat_model) = chat_model {
            current.chat_model = chat_model.to_string();
        }
        if let Some(embed_model) = embed_model {
            current.embed_model = embed_model.to_string();
        }
        current.save(&self.config_path).map_err(RagError::Other)
    }
}
