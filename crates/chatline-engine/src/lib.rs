//! # chatline-engine
//!
//! The "narrow waist" of the chatline stack. Defines the wire protocol spoken
//! with the generation backend, the error taxonomy, and the [`Transport`]
//! trait that every connection type implements. The session controller only
//! talks to a `Transport`, so WebSocket, HTTP and scripted test transports can
//! be swapped without changing dialogue logic.
//!
//! ## Design Notes
//!
//! ### One response per await
//! `Transport::next_step` yields exactly one backend response. Callers await
//! it in a loop, which keeps at most one call outstanding per connection.
//!
//! ### Failure classification
//! Backends report failures as free-form text. [`FailureKind::classify`] maps
//! an error onto the small set of categories the retry policy acts on.

pub mod protocol;

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

pub use protocol::{
    ClientMessage, GenerateRequest, GenerateStep, GenerationParams, OpenSession, ServerMessage,
};

pub type Result<T> = std::result::Result<T, ChatError>;

/// Top-level error type for transport and dialogue operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ChatError {
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("Connection was closed")]
    Closed,
    #[error("{0}")]
    Backend(String),
    #[error("Protocol error: {0}")]
    Protocol(String),
    #[error("No open inference session")]
    NoSession,
    #[error("Can't do this while the AI is writing a response")]
    Busy,
    #[error("Nothing to retry")]
    NothingToRetry,
    #[error("Unknown model: {0}")]
    UnknownModel(String),
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::Protocol(err.to_string())
    }
}

/// Category of a failure, as seen by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, dropped or closed by the peer.
    Transport,
    /// The backend evicted the session state.
    SessionExpired,
    /// The requested session length is too small for the dialogue.
    LengthExceeded,
    /// The backend has no room for another session (attention cache full).
    Overloaded,
    /// Any other backend message.
    Other,
}

/// Message patterns in precedence order.
static FAILURE_PATTERNS: LazyLock<Vec<(FailureKind, Regex)>> = LazyLock::new(|| {
    [
        (FailureKind::SessionExpired, r"Session .+ expired"),
        (FailureKind::LengthExceeded, r"Maximum length exceeded"),
        (FailureKind::Overloaded, r"(?i)attention cache|could not allocate"),
    ]
    .into_iter()
    .filter_map(|(kind, pattern)| Regex::new(pattern).ok().map(|regex| (kind, regex)))
    .collect()
});

impl FailureKind {
    /// Classify an error by its variant and, for backend errors, its message.
    pub fn classify(err: &ChatError) -> Self {
        match err {
            ChatError::Connection(_) | ChatError::Closed | ChatError::NoSession => {
                FailureKind::Transport
            }
            ChatError::Backend(message) | ChatError::Protocol(message) => {
                Self::classify_message(message)
            }
            _ => FailureKind::Other,
        }
    }

    /// Classify a raw backend message (traceback text or short message).
    pub fn classify_message(message: &str) -> Self {
        FAILURE_PATTERNS
            .iter()
            .find(|(_, regex)| regex.is_match(message))
            .map_or(FailureKind::Other, |(kind, _)| *kind)
    }
}

/// A connection to a generation backend.
///
/// Implementations own their connection handle. A transport is "open" between
/// a successful [`open_session`](Transport::open_session) and the next
/// [`close`](Transport::close) or error; any error leaves the backend-side
/// session unusable and callers must reopen.
#[async_trait]
pub trait Transport: Send {
    /// Open an inference session for `request.model` with a token budget of
    /// `request.max_length`.
    async fn open_session(&mut self, request: &OpenSession) -> Result<()>;

    /// Start a generate call. Responses are read with [`next_step`](Transport::next_step).
    async fn send_generate(&mut self, request: &GenerateRequest) -> Result<()>;

    /// Await the next response of the current generate call.
    async fn next_step(&mut self) -> Result<GenerateStep>;

    /// Tear down the connection. Idempotent.
    async fn close(&mut self);

    /// Whether the connection handle is currently open.
    fn is_open(&self) -> bool;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn open_session(&mut self, request: &OpenSession) -> Result<()> {
        (**self).open_session(request).await
    }

    async fn send_generate(&mut self, request: &GenerateRequest) -> Result<()> {
        (**self).send_generate(request).await
    }

    async fn next_step(&mut self) -> Result<GenerateStep> {
        (**self).next_step().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
