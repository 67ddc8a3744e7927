//! Model configuration records.
//!
//! A [`ModelConfig`] has three parts: how to address the model on the backend,
//! how to present it, and how to drive a dialogue with it (tokens that
//! delimit turns, the session length ceiling and sampling parameters).

use chatline_engine::GenerationParams;
use serde::{Deserialize, Serialize};

use crate::RegistryError;

/// How the backend identifies the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBackendConfig {
    /// Base model repository (e.g., `huggyllama/llama-65b`).
    pub repository: String,

    /// Optional adapter applied on top of the repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adapter: Option<String>,

    /// Additional ids the model can be requested by.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Whether the model is offered through the public API.
    #[serde(default = "default_public_api")]
    pub public_api: bool,
}

fn default_public_api() -> bool {
    true
}

impl ModelBackendConfig {
    /// Primary id sent in `open_inference_session`: the adapter when present,
    /// otherwise the repository.
    pub fn key(&self) -> &str {
        self.adapter.as_deref().unwrap_or(&self.repository)
    }
}

/// How the model is presented to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFrontendConfig {
    /// Display name (e.g., "BLOOMZ-176B").
    pub name: String,
    /// Link to the model card.
    pub model_card: String,
    /// License name or link.
    #[serde(default)]
    pub license: String,
}

/// Dialogue parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelChatConfig {
    /// Ceiling for the session length budget, in tokens.
    pub max_session_length: usize,

    /// Appended after every human turn.
    pub sep_token: String,

    /// Terminates assistant turns; its appearance in output ends generation.
    pub stop_token: String,

    /// Other sequences that end generation and are stripped from output.
    #[serde(default)]
    pub extra_stop_sequences: Vec<String>,

    /// Sampling parameters sent with every generate call.
    #[serde(default)]
    pub generation_params: GenerationParams,
}

impl ModelChatConfig {
    /// All sequences stripped from generated text: the stop token first, then
    /// the extra stop sequences.
    pub fn stop_sequences(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.stop_token.as_str())
            .chain(self.extra_stop_sequences.iter().map(String::as_str))
    }
}

/// Complete configuration for one model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub backend: ModelBackendConfig,
    pub frontend: ModelFrontendConfig,
    pub chat: ModelChatConfig,
}

impl ModelConfig {
    /// Primary key of the model.
    pub fn key(&self) -> &str {
        self.backend.key()
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.frontend.name
    }

    /// Check the record for values that would make a dialogue impossible.
    pub fn validate(&self) -> Result<(), RegistryError> {
        let key = self.key();
        let invalid = |field: &str, reason: &str| RegistryError::InvalidField {
            model: key.to_string(),
            field: field.to_string(),
            reason: reason.to_string(),
        };

        if self.backend.repository.trim().is_empty() {
            return Err(invalid("backend.repository", "must not be empty"));
        }
        if self.frontend.name.trim().is_empty() {
            return Err(invalid("frontend.name", "must not be empty"));
        }
        let chat = &self.chat;
        if chat.max_session_length == 0 {
            return Err(invalid("chat.max_session_length", "must be positive"));
        }
        if chat.stop_token.is_empty() {
            return Err(invalid("chat.stop_token", "must not be empty"));
        }
        if chat.sep_token.is_empty() {
            return Err(invalid("chat.sep_token", "must not be empty"));
        }
        if chat.extra_stop_sequences.iter().any(String::is_empty) {
            return Err(invalid("chat.extra_stop_sequences", "must not contain empty sequences"));
        }

        let params = &chat.generation_params;
        if params.do_sample {
            if let Some(t) = params.temperature {
                if !t.is_finite() || t <= 0.0 {
                    return Err(invalid("chat.generation_params.temperature", "must be > 0 when sampling"));
                }
            }
        }
        if let Some(p) = params.top_p {
            if p.is_nan() || p <= 0.0 || p > 1.0 {
                return Err(invalid("chat.generation_params.top_p", "must be in (0, 1]"));
            }
        }
        if params.top_k == Some(0) {
            return Err(invalid("chat.generation_params.top_k", "must be positive"));
        }
        Ok(())
    }
}
