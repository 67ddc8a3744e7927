//! Transport selection.
//!
//! Provides:
//! - [`TransportKind`]: the protocols a backend can be reached over
//! - [`Endpoint`]: a validated backend URL paired with its transport kind
//! - [`Endpoint::connect`]: builds the matching [`Transport`] behind a box
//! - [`TransportError`]: connection-level failures of the concrete transports

use std::fmt;
use std::str::FromStr;

use chatline_engine::{ChatError, Transport};
use url::Url;

use crate::http::HttpTransport;
use crate::ws::WebSocketTransport;

/// Protocol used to reach the generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Session-oriented WebSocket API (`/api/v2/generate`).
    WebSocket,
    /// Stateless HTTP API (`/api/v1/generate`).
    Http,
}

impl TransportKind {
    /// All transport kinds.
    pub fn all() -> &'static [TransportKind] {
        &[TransportKind::WebSocket, TransportKind::Http]
    }

    /// Path of the generate endpoint for this kind.
    pub fn default_path(&self) -> &'static str {
        match self {
            TransportKind::WebSocket => "/api/v2/generate",
            TransportKind::Http => "/api/v1/generate",
        }
    }

    /// Infer the kind from a URL scheme.
    pub fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme {
            "ws" | "wss" => Some(TransportKind::WebSocket),
            "http" | "https" => Some(TransportKind::Http),
            _ => None,
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::WebSocket => write!(f, "ws"),
            TransportKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ws" | "websocket" => Ok(TransportKind::WebSocket),
            "http" => Ok(TransportKind::Http),
            other => Err(format!("unknown transport {other:?} (expected ws or http)")),
        }
    }
}

/// Failure below the protocol layer. Surfaces as [`ChatError::Connection`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported scheme {0:?} (expected ws, wss, http or https)")]
    Scheme(String),
}

impl From<TransportError> for ChatError {
    fn from(err: TransportError) -> Self {
        ChatError::Connection(err.to_string())
    }
}

/// Map a transport-level error into the dialogue error taxonomy.
pub(crate) fn connection_error(err: impl Into<TransportError>) -> ChatError {
    err.into().into()
}

/// A backend URL and the transport used to reach it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub kind: TransportKind,
    pub url: Url,
}

impl Endpoint {
    /// Parse `url`, inferring the transport from its scheme unless `kind` is
    /// given. A URL without a path gets the kind's default generate path.
    /// Schemes are rewritten to match an explicit kind (`http` ↔ `ws`).
    pub fn parse(url: &str, kind: Option<TransportKind>) -> chatline_engine::Result<Self> {
        let mut url = Url::parse(url).map_err(connection_error)?;
        let inferred = TransportKind::from_scheme(url.scheme())
            .ok_or_else(|| connection_error(TransportError::Scheme(url.scheme().to_string())))?;
        let kind = kind.unwrap_or(inferred);

        if kind != inferred {
            let secure = matches!(url.scheme(), "wss" | "https");
            let scheme = match (kind, secure) {
                (TransportKind::WebSocket, false) => "ws",
                (TransportKind::WebSocket, true) => "wss",
                (TransportKind::Http, false) => "http",
                (TransportKind::Http, true) => "https",
            };
            url.set_scheme(scheme)
                .map_err(|_| ChatError::Connection(format!("cannot use {scheme} with {url}")))?;
        }
        if url.path().is_empty() || url.path() == "/" {
            url.set_path(kind.default_path());
        }
        Ok(Self { kind, url })
    }

    /// Build a transport for this endpoint. No connection is made until a
    /// session is opened.
    pub fn connect(&self) -> Box<dyn Transport> {
        match self.kind {
            TransportKind::WebSocket => Box::new(WebSocketTransport::new(self.url.clone())),
            TransportKind::Http => Box::new(HttpTransport::new(self.url.clone())),
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.url, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_scheme() {
        let ep = Endpoint::parse("ws://localhost:8000/api/v2/generate", None).unwrap();
        assert_eq!(ep.kind, TransportKind::WebSocket);
        let ep = Endpoint::parse("https://chat.example.org/api/v1/generate", None).unwrap();
        assert_eq!(ep.kind, TransportKind::Http);
    }

    #[test]
    fn default_path_is_filled_in() {
        let ep = Endpoint::parse("ws://localhost:8000", None).unwrap();
        assert_eq!(ep.url.as_str(), "ws://localhost:8000/api/v2/generate");
        let ep = Endpoint::parse("http://localhost:8000/", None).unwrap();
        assert_eq!(ep.url.as_str(), "http://localhost:8000/api/v1/generate");
    }

    #[test]
    fn explicit_kind_rewrites_scheme() {
        let ep = Endpoint::parse("https://chat.example.org", Some(TransportKind::WebSocket)).unwrap();
        assert_eq!(ep.url.scheme(), "wss");
        assert_eq!(ep.url.path(), "/api/v2/generate");

        let ep = Endpoint::parse("ws://localhost:8000/custom", Some(TransportKind::Http)).unwrap();
        assert_eq!(ep.url.as_str(), "http://localhost:8000/custom");
    }

    #[test]
    fn rejects_other_schemes() {
        assert!(matches!(
            Endpoint::parse("ftp://localhost/", None),
            Err(ChatError::Connection(_))
        ));
        assert!(Endpoint::parse("not a url", None).is_err());
    }

    #[test]
    fn kind_round_trips_through_strings() {
        for kind in TransportKind::all() {
            assert_eq!(kind.to_string().parse::<TransportKind>().unwrap(), *kind);
        }
        assert_eq!("websocket".parse::<TransportKind>(), Ok(TransportKind::WebSocket));
    }
}
