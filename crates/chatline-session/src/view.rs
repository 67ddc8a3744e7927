//! The UI side of the controller.

use chatline_engine::{ChatError, FailureKind};
use chatline_runtime::SpeedReport;

use crate::transcript::Turn;

/// Receives display updates from the [`Controller`](crate::Controller).
///
/// Every method has a no-op default so views only implement what they show.
pub trait ChatView: Send {
    /// A new assistant turn was started (after the human turn was recorded).
    fn on_turn_started(&mut self, _turn: &Turn) {}

    /// Text of the active assistant turn changed. `text` is the whole turn
    /// text with stop sequences removed; `fragment` is the raw new output.
    fn on_text(&mut self, _text: &str, _fragment: &str) {}

    /// A speed estimate is available. `report.slow` asks for the
    /// "contribute capacity" hint.
    fn on_speed(&mut self, _report: &SpeedReport) {}

    /// The assistant turn was finalized.
    fn on_turn_finished(&mut self, _turn: &Turn, _stopped_by_user: bool) {}

    /// A failure is being retried without user involvement.
    fn on_retry(&mut self, _kind: FailureKind, _attempt: usize) {}

    /// A failure was surfaced; the user may retry or reset. `kind` lets the
    /// view word overload differently from other backend errors.
    fn on_error(&mut self, _error: &ChatError, _kind: FailureKind) {}
}

/// View that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopView;

impl ChatView for NoopView {}
