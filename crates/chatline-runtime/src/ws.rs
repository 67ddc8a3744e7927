//! WebSocket transport for the session-oriented generate API.
//!
//! One socket carries one inference session. The open request is the first
//! frame; afterwards each `generate` frame is answered by a stream of step
//! frames ending with `"stop": true`. Closing the socket drops the session on
//! the backend, so the socket is torn down after any failure.

use async_trait::async_trait;
use chatline_engine::{
    ChatError, ClientMessage, GenerateRequest, GenerateStep, OpenSession, Result, ServerMessage,
    Transport,
};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

use crate::backend::connection_error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Transport over a single WebSocket connection.
pub struct WebSocketTransport {
    url: Url,
    ws: Option<WsStream>,
}

impl WebSocketTransport {
    /// Create a transport for `url`. Does not connect yet.
    pub fn new(url: Url) -> Self {
        Self { url, ws: None }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let text = message.to_json()?;
        let ws = self.ws.as_mut().ok_or(ChatError::NoSession)?;
        let sent = ws.send(Message::Text(text)).await;
        sent.map_err(|e| self.fail(connection_error(e)))
    }

    /// Read frames until a JSON reply arrives.
    async fn recv(&mut self) -> Result<ServerMessage> {
        let ws = self.ws.as_mut().ok_or(ChatError::NoSession)?;
        let outcome = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => break ServerMessage::parse(&text),
                Some(Ok(Message::Binary(bytes))) => {
                    break match String::from_utf8(bytes) {
                        Ok(text) => ServerMessage::parse(&text),
                        Err(e) => Err(ChatError::Protocol(e.to_string())),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!(?frame, "backend closed the socket");
                    break Err(ChatError::Closed);
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(connection_error(e)),
                None => break Err(ChatError::Closed),
            }
        };
        outcome.map_err(|e| self.fail(e))
    }

    /// Drop the socket after an error; the backend session is gone with it.
    fn fail(&mut self, err: ChatError) -> ChatError {
        if self.ws.take().is_some() {
            warn!(error = %err, url = %self.url, "websocket transport failed");
        }
        err
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open_session(&mut self, request: &OpenSession) -> Result<()> {
        self.close().await;

        let (ws, _response) = connect_async(self.url.as_str())
            .await
            .map_err(connection_error)?;
        self.ws = Some(ws);
        debug!(url = %self.url, model = %request.model, max_length = request.max_length, "socket connected");

        self.send(&ClientMessage::OpenInferenceSession(request.clone()))
            .await?;
        let reply = self.recv().await?;
        reply.into_ack().map_err(|e| self.fail(e))
    }

    async fn send_generate(&mut self, request: &GenerateRequest) -> Result<()> {
        self.send(&ClientMessage::Generate(request.clone())).await
    }

    async fn next_step(&mut self) -> Result<GenerateStep> {
        let reply = self.recv().await?;
        reply.into_step().map_err(|e| self.fail(e))
    }

    async fn close(&mut self) {
        if let Some(mut ws) = self.ws.take() {
            if let Err(e) = ws.close(None).await {
                debug!(error = %e, "error while closing socket");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.ws.is_some()
    }
}
