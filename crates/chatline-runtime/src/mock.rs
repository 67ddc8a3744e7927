//! Scripted transport for tests.
//!
//! Responses are queued up front; every call is recorded. Clones share the
//! same script and log, so a test can keep one handle while the controller
//! owns another.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chatline_engine::{ChatError, GenerateRequest, GenerateStep, OpenSession, Result, Transport};

/// A call observed by [`MockTransport`].
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Open(OpenSession),
    Generate(GenerateRequest),
    Close,
}

#[derive(Default)]
struct MockState {
    opens: VecDeque<Result<()>>,
    steps: VecDeque<(Duration, Result<GenerateStep>)>,
    calls: Vec<MockCall>,
    open: bool,
}

/// Transport that replays queued responses.
///
/// Opens succeed unless a failure was queued with [`push_open`](Self::push_open).
/// When the step queue runs dry, `next_step` fails with [`ChatError::Closed`].
#[derive(Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next `open_session`.
    pub fn push_open(&self, result: Result<()>) -> &Self {
        self.state.lock().unwrap().opens.push_back(result);
        self
    }

    /// Queue a successful step.
    pub fn push_step(&self, outputs: &str, stop: bool) -> &Self {
        self.state
            .lock()
            .unwrap()
            .steps
            .push_back((Duration::ZERO, Ok(GenerateStep::new(outputs, stop))));
        self
    }

    /// Queue a successful step that arrives after `delay`.
    pub fn push_delayed_step(&self, outputs: &str, stop: bool, delay: Duration) -> &Self {
        self.state
            .lock()
            .unwrap()
            .steps
            .push_back((delay, Ok(GenerateStep::new(outputs, stop))));
        self
    }

    /// Queue a failed step.
    pub fn push_step_error(&self, err: ChatError) -> &Self {
        self.state
            .lock()
            .unwrap()
            .steps
            .push_back((Duration::ZERO, Err(err)));
        self
    }

    /// Queue a backend failure message for the next step.
    pub fn push_backend_error(&self, message: &str) -> &Self {
        self.push_step_error(ChatError::Backend(message.to_string()))
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Open requests, in order.
    pub fn opens(&self) -> Vec<OpenSession> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Open(o) => Some(o),
                _ => None,
            })
            .collect()
    }

    /// Generate requests, in order.
    pub fn generates(&self) -> Vec<GenerateRequest> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                MockCall::Generate(g) => Some(g),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Close))
            .count()
    }

    pub fn remaining_steps(&self) -> usize {
        self.state.lock().unwrap().steps.len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn open_session(&mut self, request: &OpenSession) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Open(request.clone()));
        let result = state.opens.pop_front().unwrap_or(Ok(()));
        state.open = result.is_ok();
        result
    }

    async fn send_generate(&mut self, request: &GenerateRequest) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if !state.open {
            return Err(ChatError::NoSession);
        }
        state.calls.push(MockCall::Generate(request.clone()));
        Ok(())
    }

    async fn next_step(&mut self) -> Result<GenerateStep> {
        let (delay, result) = {
            let mut state = self.state.lock().unwrap();
            if !state.open {
                return Err(ChatError::NoSession);
            }
            state
                .steps
                .pop_front()
                .unwrap_or((Duration::ZERO, Err(ChatError::Closed)))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if result.is_err() {
            self.state.lock().unwrap().open = false;
        }
        result
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        state.calls.push(MockCall::Close);
        state.open = false;
    }

    fn is_open(&self) -> bool {
        self.state.lock().unwrap().open
    }
}
