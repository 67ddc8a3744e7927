//! # chatline-session
//!
//! Dialogue state on top of a [`Transport`](chatline_engine::Transport):
//! the transcript, the inference session lifecycle, retries after backend
//! failures, user cancellation and speed reporting.
//!
//! ```no_run
//! use chatline_models::ModelRegistry;
//! use chatline_runtime::Endpoint;
//! use chatline_session::Controller;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let endpoint = Endpoint::parse("ws://localhost:8000", None)?;
//! let mut controller = Controller::new(endpoint.connect(), ModelRegistry::builtin()?);
//! let reply = controller.submit("What is the capital of France?").await?;
//! println!("{}", reply.text);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod policy;
pub mod transcript;
pub mod view;

pub use controller::{Controller, Session, SessionState, StopHandle, TurnOutcome};
pub use policy::{RetryDecision, SessionPolicy};
pub use transcript::{strip_stop_sequences, DialogueMode, Role, Transcript, Turn, FEW_SHOT_EXAMPLE};
pub use view::{ChatView, NoopView};
