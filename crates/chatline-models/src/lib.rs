//! # chatline-models
//!
//! Per-model dialogue configuration and a registry keyed by model id.
//!
//! The registry is built once at startup, either from the built-in presets or
//! from a TOML file, and validated before use: every key and alias is unique,
//! every record passes [`ModelConfig::validate`], and the default model exists.
//!
//! ```toml
//! default_model = "bigscience/bloomz"
//!
//! [[families]]
//! name = "BLOOM"
//!
//! [[families.models]]
//! backend = { repository = "bigscience/bloomz", aliases = ["bigscience/bloomz-petals"] }
//! frontend = { name = "BLOOMZ-176B", model_card = "https://huggingface.co/bigscience/bloomz" }
//!
//! [families.models.chat]
//! max_session_length = 2048
//! sep_token = "\n\n"
//! stop_token = "</s>"
//! extra_stop_sequences = ["\n\nHuman"]
//! generation_params = { do_sample = true, temperature = 0.75, top_p = 0.9 }
//! ```

pub mod config;
pub mod presets;

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

pub use config::{ModelBackendConfig, ModelChatConfig, ModelConfig, ModelFrontendConfig};

/// Errors from building or loading a registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("model {model}: invalid {field}: {reason}")]
    InvalidField {
        model: String,
        field: String,
        reason: String,
    },
    #[error("duplicate model id: {0}")]
    DuplicateKey(String),
    #[error("default model {0} is not in the registry")]
    UnknownDefault(String),
    #[error("registry has no models")]
    Empty,
    #[error("failed to parse registry: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read registry: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

/// A named group of related models, listed together in the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFamily {
    pub name: String,
    pub models: Vec<ModelConfig>,
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    default_model: Option<String>,
    families: Vec<ModelFamily>,
}

/// Validated set of model configurations.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    families: Vec<ModelFamily>,
    /// Key or alias → (family index, model index).
    index: HashMap<String, (usize, usize)>,
    default: (usize, usize),
}

impl ModelRegistry {
    /// Build a registry. The default is `default_model` when given, otherwise
    /// the first model of the first family.
    pub fn new(families: Vec<ModelFamily>, default_model: Option<&str>) -> Result<Self> {
        let mut index = HashMap::new();
        for (fi, family) in families.iter().enumerate() {
            for (mi, model) in family.models.iter().enumerate() {
                model.validate()?;
                let ids = std::iter::once(model.key()).chain(model.backend.aliases.iter().map(String::as_str));
                for id in ids {
                    if index.insert(id.to_string(), (fi, mi)).is_some() {
                        return Err(RegistryError::DuplicateKey(id.to_string()));
                    }
                }
            }
        }

        let default = match default_model {
            Some(id) => *index
                .get(id)
                .ok_or_else(|| RegistryError::UnknownDefault(id.to_string()))?,
            None => families
                .iter()
                .enumerate()
                .find(|(_, f)| !f.models.is_empty())
                .map(|(fi, _)| (fi, 0))
                .ok_or(RegistryError::Empty)?,
        };

        tracing::debug!(models = index.len(), "model registry loaded");
        Ok(Self {
            families,
            index,
            default,
        })
    }

    /// Registry of the built-in presets.
    pub fn builtin() -> Result<Self> {
        Self::new(presets::families(), None)
    }

    /// Parse a registry from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let file: RegistryFile = toml::from_str(text)?;
        Self::new(file.families, file.default_model.as_deref())
    }

    /// Load a registry from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Look a model up by key or alias.
    pub fn get(&self, id: &str) -> Option<&ModelConfig> {
        self.index.get(id).map(|&pos| self.at(pos))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn default_model(&self) -> &ModelConfig {
        self.at(self.default)
    }

    pub fn families(&self) -> &[ModelFamily] {
        &self.families
    }

    /// All models, in family order.
    pub fn models(&self) -> impl Iterator<Item = &ModelConfig> {
        self.families.iter().flat_map(|f| f.models.iter())
    }

    pub fn len(&self) -> usize {
        self.families.iter().map(|f| f.models.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn at(&self, (fi, mi): (usize, usize)) -> &ModelConfig {
        &self.families[fi].models[mi]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_is_valid() {
        let registry = ModelRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 6);
        assert_eq!(registry.default_model().key(), "petals-team/StableBeluga2");
    }

    #[test]
    fn adapter_models_are_keyed_by_adapter() {
        let registry = ModelRegistry::builtin().unwrap();
        let guanaco = registry.get("timdettmers/guanaco-65b").unwrap();
        assert_eq!(guanaco.backend.repository, "huggyllama/llama-65b");
        let llama = registry.get("huggyllama/llama-65b").unwrap();
        assert_eq!(llama.name(), "Llama-65B");
    }

    #[test]
    fn aliases_resolve_to_the_same_model() {
        let registry = ModelRegistry::builtin().unwrap();
        let by_alias = registry.get("bigscience/bloomz-petals").unwrap();
        let by_key = registry.get("bigscience/bloomz").unwrap();
        assert_eq!(by_alias, by_key);
        assert_eq!(by_key.chat.stop_token, "</s>");
        assert!(registry.get("bigscience/unknown").is_none());
    }
}
