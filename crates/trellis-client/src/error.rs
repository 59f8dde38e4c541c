//! Error types for the trellis middleware

use std::time::Duration;

use thiserror::Error;
use trellis_protocol::InvalidArgument;

/// Errors surfaced to callers of the middleware.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Request or subscription could not be constructed
    #[error(transparent)]
    InvalidArgument(#[from] InvalidArgument),

    /// A request/response call did not complete
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An awaited call exceeded its deadline
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The middleware has been shut down
    #[error("middleware is closed")]
    Closed,

    /// No factory registered under this service name
    #[error("unknown service: {0}")]
    UnknownService(String),

    /// The service registered under this name has a different type
    #[error("service `{0}` is registered with a different type")]
    ServiceType(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Called outside of a tokio runtime
    #[error("no async runtime available: {0}")]
    Runtime(String),
}

/// Failures of the underlying transports.
#[derive(Debug, Error)]
pub enum TransportError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// WebSocket failure
    #[error("websocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// A frame could not be serialised
    #[error("serialisation failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The peer or the local pump went away
    #[error("transport closed: {0}")]
    Closed(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// Why the event connection left the `Connected` state or never reached it.
///
/// Only logged; never returned from a caller-facing operation.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("handshake not completed within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("server rejected the connection: {0}")]
    Rejected(String),

    #[error("unexpected frame during handshake: {0}")]
    UnexpectedFrame(String),

    #[error("no traffic within {0:?} of a heartbeat probe")]
    HeartbeatTimeout(Duration),

    #[error("event stream closed by peer")]
    StreamClosed,
}

/// Result type for middleware operations
pub type Result<T> = std::result::Result<T, ClientError>;
