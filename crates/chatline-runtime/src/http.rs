//! HTTP transport for the stateless generate API.
//!
//! The HTTP API keeps no state between requests, so the "session" lives on
//! the client: the transport accumulates everything sent and generated and
//! posts the full context with every single-token request. Completion is
//! derived locally by watching for the stop sequences in the text generated
//! since the last `generate` call.

use async_trait::async_trait;
use chatline_engine::{
    ChatError, GenerateRequest, GenerateStep, OpenSession, Result, ServerMessage, Transport,
};
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::backend::connection_error;

/// Form body of one `/api/v1/generate` request.
#[derive(Debug, Serialize)]
struct GenerateForm<'a> {
    model: &'a str,
    inputs: &'a str,
    do_sample: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    max_length: usize,
    max_new_tokens: usize,
}

/// Client-side session state.
struct HttpSession {
    model: String,
    max_length: usize,
    /// Everything the backend has seen or produced in this session.
    context: String,
    /// The generate call in progress.
    pending: Option<GenerateRequest>,
    /// Text generated since the last `send_generate`.
    generated: String,
}

/// Transport over sequential HTTP requests.
pub struct HttpTransport {
    client: reqwest::Client,
    url: Url,
    session: Option<HttpSession>,
}

impl HttpTransport {
    pub fn new(url: Url) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: Url) -> Self {
        Self {
            client,
            url,
            session: None,
        }
    }

    /// Text accumulated in the current session, if any.
    pub fn context(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.context.as_str())
    }

    async fn post(&self, form: &GenerateForm<'_>) -> Result<ServerMessage> {
        let response = self
            .client
            .post(self.url.clone())
            .form(form)
            .send()
            .await
            .map_err(connection_error)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(connection_error)?;
        match ServerMessage::parse(&body) {
            Ok(message) => Ok(message),
            Err(_) if !status.is_success() => {
                Err(ChatError::Connection(format!("backend returned {status}")))
            }
            Err(e) => Err(e),
        }
    }

    async fn step(&mut self) -> Result<GenerateStep> {
        let session = self.session.as_ref().ok_or(ChatError::NoSession)?;
        let request = session
            .pending
            .as_ref()
            .ok_or_else(|| ChatError::Protocol("no generate call in progress".to_string()))?;

        let form = GenerateForm {
            model: &session.model,
            inputs: &session.context,
            do_sample: request.params.do_sample as u8,
            temperature: request.params.temperature,
            top_k: request.params.top_k,
            top_p: request.params.top_p,
            max_length: session.max_length,
            max_new_tokens: request.max_new_tokens,
        };
        let mut step = self.post(&form).await?.into_step()?;

        let session = self.session.as_mut().ok_or(ChatError::NoSession)?;
        session.context.push_str(&step.outputs);
        session.generated.push_str(&step.outputs);
        let stopped = session
            .pending
            .as_ref()
            .is_some_and(|r| r.is_stopped_by(&session.generated));
        step.stop |= stopped;
        if step.stop {
            session.pending = None;
        }
        Ok(step)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open_session(&mut self, request: &OpenSession) -> Result<()> {
        debug!(url = %self.url, model = %request.model, max_length = request.max_length, "http session opened");
        self.session = Some(HttpSession {
            model: request.model.clone(),
            max_length: request.max_length,
            context: String::new(),
            pending: None,
            generated: String::new(),
        });
        Ok(())
    }

    async fn send_generate(&mut self, request: &GenerateRequest) -> Result<()> {
        let session = self.session.as_mut().ok_or(ChatError::NoSession)?;
        if let Some(inputs) = &request.inputs {
            session.context.push_str(inputs);
        }
        session.generated.clear();
        session.pending = Some(request.clone());
        Ok(())
    }

    async fn next_step(&mut self) -> Result<GenerateStep> {
        let result = self.step().await;
        if let Err(e) = &result {
            if self.session.take().is_some() {
                warn!(error = %e, url = %self.url, "http transport failed");
            }
        }
        result
    }

    async fn close(&mut self) {
        self.session = None;
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }
}
