//! Wire protocol for the generation backend.
//!
//! Messages are JSON objects. Client requests are tagged by `type`:
//!
//! ```text
//! {"type": "open_inference_session", "model": "...", "max_length": 1024}
//! {"type": "generate", "inputs": "...", "max_new_tokens": 1, "stop_sequence": "\n\n", ...}
//! ```
//!
//! Every server reply carries an `ok` flag. Failures put a human-readable
//! message in `traceback` (older backends) or `message`.

use serde::{Deserialize, Serialize};

use crate::{ChatError, Result};

/// Sampling parameters forwarded verbatim with each generate call.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default)]
    pub do_sample: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
}

impl GenerationParams {
    /// Greedy decoding.
    pub fn greedy() -> Self {
        Self::default()
    }

    /// Sampling with the given temperature.
    pub fn sampling(temperature: f32) -> Self {
        Self {
            do_sample: true,
            temperature: Some(temperature),
            ..Self::default()
        }
    }

    pub fn with_top_k(mut self, k: u32) -> Self {
        self.top_k = Some(k);
        self
    }

    pub fn with_top_p(mut self, p: f32) -> Self {
        self.top_p = Some(p);
        self
    }
}

/// Payload of an `open_inference_session` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenSession {
    pub model: String,
    pub max_length: usize,
}

/// Payload of a `generate` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// New text since the last call; `None` continues from the session state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<String>,
    pub max_new_tokens: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub extra_stop_sequences: Vec<String>,
    #[serde(flatten)]
    pub params: GenerationParams,
}

impl GenerateRequest {
    /// A single-token step request carrying `inputs`.
    pub fn step(inputs: impl Into<String>) -> Self {
        Self {
            inputs: Some(inputs.into()),
            max_new_tokens: 1,
            stop_sequence: None,
            extra_stop_sequences: Vec::new(),
            params: GenerationParams::default(),
        }
    }

    pub fn with_stop_sequence(mut self, stop: impl Into<String>) -> Self {
        self.stop_sequence = Some(stop.into());
        self
    }

    pub fn with_extra_stop_sequences(mut self, extra: Vec<String>) -> Self {
        self.extra_stop_sequences = extra;
        self
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    /// Whether `text` contains the stop sequence or any extra stop sequence.
    pub fn is_stopped_by(&self, text: &str) -> bool {
        self.stop_sequence
            .iter()
            .chain(self.extra_stop_sequences.iter())
            .any(|seq| !seq.is_empty() && text.contains(seq.as_str()))
    }
}

/// A client → server frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    OpenInferenceSession(OpenSession),
    Generate(GenerateRequest),
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A server → client frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ServerMessage {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<String>,
    #[serde(default)]
    pub stop: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<usize>,
    #[serde(default, alias = "message", skip_serializing_if = "Option::is_none")]
    pub traceback: Option<String>,
}

impl ServerMessage {
    /// Bare acknowledgement, as sent after a session opens.
    pub fn ack() -> Self {
        Self {
            ok: true,
            ..Self::default()
        }
    }

    /// One generated fragment.
    pub fn step(outputs: impl Into<String>, stop: bool) -> Self {
        Self {
            ok: true,
            outputs: Some(outputs.into()),
            stop,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            traceback: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    fn check(&self) -> Result<()> {
        if self.ok {
            Ok(())
        } else {
            Err(ChatError::Backend(
                self.traceback
                    .clone()
                    .unwrap_or_else(|| "Unknown backend error".to_string()),
            ))
        }
    }

    /// Interpret this frame as the reply to an open request.
    pub fn into_ack(self) -> Result<()> {
        self.check()
    }

    /// Interpret this frame as one generate step.
    pub fn into_step(self) -> Result<GenerateStep> {
        self.check()?;
        Ok(GenerateStep {
            outputs: self.outputs.unwrap_or_default(),
            stop: self.stop,
            token_count: self.token_count,
        })
    }
}

/// One successful generate response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GenerateStep {
    /// Text of the newly generated token(s).
    pub outputs: String,
    /// Whether the backend considers this generate call complete.
    pub stop: bool,
    /// Tokens produced by this step, when the backend reports it.
    pub token_count: Option<usize>,
}

impl GenerateStep {
    pub fn new(outputs: impl Into<String>, stop: bool) -> Self {
        Self {
            outputs: outputs.into(),
            stop,
            token_count: None,
        }
    }

    /// Number of tokens this step accounts for (1 unless reported).
    pub fn tokens(&self) -> usize {
        self.token_count.unwrap_or(1)
    }
}
