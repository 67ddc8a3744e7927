//! # chatline-runtime
//!
//! Concrete transports for the chatline stack and the telemetry used to
//! report generation speed.
//!
//! - [`ws::WebSocketTransport`]: session-oriented WebSocket API
//! - [`http::HttpTransport`]: stateless HTTP API with a client-side session
//! - [`mock::MockTransport`]: scripted responses for tests
//! - [`backend::Endpoint`]: picks a transport from a URL
//! - [`telemetry`]: speed meter, speed reports and hooks

pub mod backend;
pub mod http;
pub mod mock;
pub mod telemetry;
pub mod ws;

pub use backend::{Endpoint, TransportError, TransportKind};
pub use http::HttpTransport;
pub use mock::{MockCall, MockTransport};
pub use telemetry::{
    GenerationMetrics, LogTelemetry, NoopTelemetry, SpeedConfig, SpeedMeter, SpeedReport,
    SpeedUnit, TelemetryHook,
};
pub use ws::WebSocketTransport;
