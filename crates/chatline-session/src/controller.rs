//! The session controller.
//!
//! Owns the transcript, the inference session and the transport, and turns a
//! human message into a streamed assistant reply:
//!
//! ```text
//! Idle ──submit──▶ Opening ──ok──▶ Ready ──generate──▶ Generating
//!                     │                                   │
//!                     └──────── failure policy ◀──────────┤
//!                                  │        │             ├─ stop=true  ─▶ Ready
//!                          auto-retry   surface           └─ user stop  ─▶ Idle
//!                                           ▼
//!                                        Failed ──retry──▶ Opening
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatline_engine::{ChatError, FailureKind, GenerateRequest, OpenSession, Result, Transport};
use chatline_models::{ModelConfig, ModelRegistry};
use chatline_runtime::{GenerationMetrics, NoopTelemetry, SpeedMeter, TelemetryHook};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::policy::{RetryDecision, SessionPolicy};
use crate::transcript::{Role, Transcript, Turn};
use crate::view::{ChatView, NoopView};

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No connection.
    Idle,
    /// Waiting for the open acknowledgement.
    Opening,
    /// Session open, waiting for input.
    Ready,
    /// A reply is streaming.
    Generating,
    /// A failure was surfaced; waiting for retry or reset.
    Failed,
}

/// Backend-side inference session as tracked by the client.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub max_length: usize,
    /// Number of transcript turns already sent in this session.
    pub position: usize,
    /// Tokens generated in this session.
    pub tokens: usize,
    /// Time spent generating in this session.
    pub elapsed: Duration,
}

impl Session {
    fn new(max_length: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            max_length,
            position: 0,
            tokens: 0,
            elapsed: Duration::ZERO,
        }
    }
}

/// Cross-task handle that asks the current generation to stop.
///
/// The flag is checked after each response, so the turn ends at the next
/// response boundary.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A finalized assistant turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub text: String,
    pub stopped_by_user: bool,
    pub metrics: GenerationMetrics,
}

/// Drives one dialogue against one transport.
pub struct Controller<T: Transport, V: ChatView = NoopView> {
    transport: T,
    view: V,
    registry: ModelRegistry,
    model: ModelConfig,
    policy: SessionPolicy,
    transcript: Transcript,
    session: Option<Session>,
    /// Budget for the next session; grows on "Maximum length exceeded".
    max_length: usize,
    state: SessionState,
    failure: Option<ChatError>,
    stop: StopHandle,
    telemetry: Arc<dyn TelemetryHook>,
}

impl<T: Transport> Controller<T, NoopView> {
    /// Controller for the registry's default model with a silent view.
    pub fn new(transport: T, registry: ModelRegistry) -> Self {
        Self::with_view(transport, registry, NoopView, SessionPolicy::default())
    }
}

impl<T: Transport, V: ChatView> Controller<T, V> {
    pub fn with_view(transport: T, registry: ModelRegistry, view: V, policy: SessionPolicy) -> Self {
        let model = registry.default_model().clone();
        let max_length = policy.initial_length(model.chat.max_session_length);
        Self {
            transport,
            view,
            registry,
            model,
            policy,
            transcript: Transcript::new(),
            session: None,
            max_length,
            state: SessionState::Idle,
            failure: None,
            stop: StopHandle::default(),
            telemetry: Arc::new(NoopTelemetry),
        }
    }

    pub fn with_telemetry(mut self, hook: Arc<dyn TelemetryHook>) -> Self {
        self.telemetry = hook;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Turns already sent in the current session; 0 without a session.
    pub fn position(&self) -> usize {
        self.session.as_ref().map_or(0, |s| s.position)
    }

    /// Budget the next session will be opened with.
    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// The failure waiting for [`retry`](Self::retry), if any.
    pub fn pending_failure(&self) -> Option<&ChatError> {
        self.failure.as_ref()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    pub fn view_mut(&mut self) -> &mut V {
        &mut self.view
    }

    /// Whether a new human turn can be submitted.
    pub fn is_awaiting_input(&self) -> bool {
        matches!(self.state, SessionState::Idle | SessionState::Ready) && self.failure.is_none()
    }

    /// Record a human turn and stream the assistant's reply.
    pub async fn submit(&mut self, text: &str) -> Result<TurnOutcome> {
        if !self.is_awaiting_input() {
            return Err(ChatError::Busy);
        }
        let mode = self.policy.mode;
        self.transcript.push_human(mode.human_prefix(), text);
        self.transcript.begin_assistant(mode.assistant_prefix());
        if let Some(turn) = self.transcript.last() {
            self.view.on_turn_started(turn);
        }
        self.stop.clear();
        self.run_turn().await
    }

    /// Re-run the turn whose failure was surfaced. Text generated before the
    /// failure is kept and the model continues from it.
    pub async fn retry(&mut self) -> Result<TurnOutcome> {
        if self.failure.take().is_none() {
            return Err(ChatError::NothingToRetry);
        }
        self.stop.clear();
        self.run_turn().await
    }

    /// Clear the transcript and close the session.
    ///
    /// Also recovers from a surfaced failure or an abandoned generation.
    pub async fn reset(&mut self) {
        self.teardown().await;
        self.transcript.clear();
        self.failure = None;
        self.stop.clear();
        self.state = SessionState::Idle;
        info!(model = %self.model.key(), "dialogue reset");
    }

    /// Switch to another model by key or alias. The transcript is kept; the
    /// session is closed and the length budget starts over.
    pub async fn switch_model(&mut self, id: &str) -> Result<()> {
        if !self.is_awaiting_input() {
            return Err(ChatError::Busy);
        }
        let model = self
            .registry
            .get(id)
            .ok_or_else(|| ChatError::UnknownModel(id.to_string()))?
            .clone();
        self.teardown().await;
        self.max_length = self.policy.initial_length(model.chat.max_session_length);
        info!(from = %self.model.key(), to = %model.key(), "switched model");
        self.model = model;
        self.state = SessionState::Idle;
        Ok(())
    }

    async fn run_turn(&mut self) -> Result<TurnOutcome> {
        // Failures seen anywhere in this turn, including before successful
        // responses.
        let mut failures = 0;
        let mut retries = 0;
        loop {
            let err = match self.attempt().await {
                Ok(outcome) => return Ok(outcome),
                Err(err) => err,
            };
            self.teardown().await;

            let kind = FailureKind::classify(&err);
            let decision = self.policy.decide(
                kind,
                self.max_length,
                self.model.chat.max_session_length,
                failures,
                retries,
            );
            failures += 1;
            match decision {
                RetryDecision::Retry => {}
                RetryDecision::Grow(length) => {
                    info!(from = self.max_length, to = length, "growing session length");
                    self.max_length = length;
                }
                RetryDecision::Surface => {
                    warn!(error = %err, ?kind, "generation failed");
                    self.state = SessionState::Failed;
                    self.failure = Some(err.clone());
                    self.view.on_error(&err, kind);
                    return Err(err);
                }
            }
            retries += 1;
            warn!(error = %err, ?kind, attempt = retries, "retrying generation");
            self.view.on_retry(kind, retries);
        }
    }

    /// One open (if needed) plus one generate call.
    async fn attempt(&mut self) -> Result<TurnOutcome> {
        if self.session.is_none() || !self.transport.is_open() {
            self.open().await?;
        }

        let chat = &self.model.chat;
        let session = self.session.as_mut().ok_or(ChatError::NoSession)?;
        let inputs = self
            .transcript
            .serialize_from(session.position, &chat.sep_token, &chat.stop_token);
        session.position = self.transcript.len();
        let request = GenerateRequest::step(inputs)
            .with_stop_sequence(chat.stop_token.clone())
            .with_extra_stop_sequences(chat.extra_stop_sequences.clone())
            .with_params(chat.generation_params.clone());
        debug!(session = %session.id, position = session.position, "sending generate");

        let mut meter = SpeedMeter::new(self.policy.speed, self.telemetry.clone());
        self.transport.send_generate(&request).await?;
        self.state = SessionState::Generating;

        loop {
            let step = self.transport.next_step().await?;
            let report = meter.mark_step(step.tokens());
            debug!(outputs = %step.outputs, stop = step.stop, "step");

            let text = self
                .transcript
                .extend_assistant(&step.outputs, self.model.chat.stop_sequences());
            self.view.on_text(text, &step.outputs);

            let stopped_by_user = self.stop.take();
            if step.stop || stopped_by_user {
                return Ok(self.finish_turn(meter.finish(), stopped_by_user).await);
            }
            if let Some(report) = report {
                self.view.on_speed(&report);
            }
        }
    }

    async fn open(&mut self) -> Result<()> {
        self.state = SessionState::Opening;
        let request = OpenSession {
            model: self.model.key().to_string(),
            max_length: self.max_length,
        };
        self.transport.open_session(&request).await?;
        let session = Session::new(self.max_length);
        info!(
            session = %session.id,
            model = %request.model,
            max_length = request.max_length,
            "inference session opened"
        );
        self.session = Some(session);
        self.state = SessionState::Ready;
        Ok(())
    }

    async fn finish_turn(&mut self, metrics: GenerationMetrics, stopped_by_user: bool) -> TurnOutcome {
        if let Some(session) = self.session.as_mut() {
            session.tokens += metrics.tokens;
            session.elapsed += Duration::from_secs_f64(metrics.total_time_ms / 1000.0);
        }
        info!(
            model = %self.model.key(),
            tokens = metrics.tokens,
            tokens_per_sec = metrics.tokens_per_sec,
            stopped_by_user,
            "turn finished"
        );

        if stopped_by_user {
            self.teardown().await;
            self.state = SessionState::Idle;
        } else {
            self.state = SessionState::Ready;
        }

        let turn = self
            .transcript
            .last()
            .cloned()
            .unwrap_or_else(|| Turn::new(Role::Assistant, "", ""));
        self.view.on_turn_finished(&turn, stopped_by_user);
        TurnOutcome {
            text: turn.text,
            stopped_by_user,
            metrics,
        }
    }

    /// Close the connection and forget the session.
    async fn teardown(&mut self) {
        self.transport.close().await;
        if let Some(session) = self.session.take() {
            debug!(session = %session.id, tokens = session.tokens, "inference session closed");
        }
    }
}
