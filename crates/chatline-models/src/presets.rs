//! Built-in model families.

use chatline_engine::GenerationParams;

use crate::config::{ModelBackendConfig, ModelChatConfig, ModelConfig, ModelFrontendConfig};
use crate::ModelFamily;

fn backend(repository: &str, adapter: Option<&str>, aliases: &[&str]) -> ModelBackendConfig {
    ModelBackendConfig {
        repository: repository.to_string(),
        adapter: adapter.map(str::to_string),
        aliases: aliases.iter().map(|a| a.to_string()).collect(),
        public_api: true,
    }
}

fn frontend(name: &str, card_repo: &str, license: &str) -> ModelFrontendConfig {
    ModelFrontendConfig {
        name: name.to_string(),
        model_card: format!("https://huggingface.co/{card_repo}"),
        license: license.to_string(),
    }
}

/// Dialogue settings shared by instruction-tuned Llama models.
pub fn llama_chat() -> ModelChatConfig {
    ModelChatConfig {
        max_session_length: 8192,
        sep_token: "###".to_string(),
        stop_token: "###".to_string(),
        extra_stop_sequences: vec!["</s>".to_string()],
        generation_params: GenerationParams::sampling(0.6).with_top_p(0.9),
    }
}

/// Dialogue settings for BLOOMZ.
pub fn bloomz_chat() -> ModelChatConfig {
    ModelChatConfig {
        max_session_length: 2048,
        sep_token: "\n\n".to_string(),
        stop_token: "</s>".to_string(),
        extra_stop_sequences: vec!["\n\nHuman".to_string()],
        generation_params: GenerationParams::sampling(0.75).with_top_p(0.9),
    }
}

/// Dialogue settings for the base BLOOM model, which has no end-of-turn token.
pub fn bloom_chat() -> ModelChatConfig {
    ModelChatConfig {
        max_session_length: 2048,
        sep_token: "\n\n".to_string(),
        stop_token: "\n\n".to_string(),
        extra_stop_sequences: Vec::new(),
        generation_params: GenerationParams::sampling(0.9).with_top_k(40),
    }
}

pub fn families() -> Vec<ModelFamily> {
    vec![
        ModelFamily {
            name: "Llama 2".to_string(),
            models: vec![
                ModelConfig {
                    backend: backend("petals-team/StableBeluga2", None, &["stabilityai/StableBeluga2"]),
                    frontend: frontend(
                        "Stable Beluga 2 (70B)",
                        "stabilityai/StableBeluga2",
                        "Stable Beluga 2 Non-Commercial Community License",
                    ),
                    chat: llama_chat(),
                },
                ModelConfig {
                    backend: backend("meta-llama/Llama-2-70b-chat-hf", None, &[]),
                    frontend: frontend(
                        "Llama 2 (70B-Chat)",
                        "meta-llama/Llama-2-70b-chat-hf",
                        "Llama 2 Community License",
                    ),
                    chat: llama_chat(),
                },
            ],
        },
        ModelFamily {
            name: "Llama".to_string(),
            models: vec![
                ModelConfig {
                    backend: backend("huggyllama/llama-65b", Some("timdettmers/guanaco-65b"), &[]),
                    frontend: frontend("Guanaco-65B", "timdettmers/guanaco-65b", "Non-commercial"),
                    chat: ModelChatConfig {
                        max_session_length: 2048,
                        ..llama_chat()
                    },
                },
                ModelConfig {
                    backend: backend("huggyllama/llama-65b", None, &[]),
                    frontend: frontend("Llama-65B", "decapoda-research/llama-65b-hf", "Non-commercial"),
                    chat: ModelChatConfig {
                        max_session_length: 2048,
                        ..llama_chat()
                    },
                },
            ],
        },
        ModelFamily {
            name: "BLOOM".to_string(),
            models: vec![
                ModelConfig {
                    backend: backend("bigscience/bloomz", None, &["bigscience/bloomz-petals"]),
                    frontend: frontend("BLOOMZ-176B", "bigscience/bloomz", "BigScience RAIL License"),
                    chat: bloomz_chat(),
                },
                ModelConfig {
                    backend: backend("bigscience/bloom", None, &["bigscience/bloom-petals"]),
                    frontend: frontend("regular BLOOM-176B", "bigscience/bloom", "BigScience RAIL License"),
                    chat: bloom_chat(),
                },
            ],
        },
    ]
}
