//! Transport seams.
//!
//! The middleware talks to the platform through two traits: one
//! request/response call per [`WireCall`], and one persistent event link.
//! Default implementations use HTTP and WebSocket; tests swap in in-memory
//! fakes.

mod http;
mod websocket;

pub use http::HttpTransport;
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use tokio::sync::mpsc;
use trellis_protocol::{InboundFrame, OutboundFrame, WireCall};

use crate::error::TransportError;

/// Executes one request/response call.
///
/// Returns the raw reply body; decoding is the dispatcher's job so that a
/// malformed body is reported inside the response rather than as a transport
/// failure.
#[async_trait]
pub trait RequestTransport: Send + Sync + 'static {
    async fn execute(&self, call: &WireCall) -> Result<String, TransportError>;
}

/// Opens the persistent event connection.
#[async_trait]
pub trait EventTransport: Send + Sync + 'static {
    async fn connect(&self) -> Result<EventLink, TransportError>;
}

/// A live event connection.
///
/// Dropping `outbound` asks the transport to close; the link is considered
/// lost once `inbound` yields `None`.
#[derive(Debug)]
pub struct EventLink {
    pub outbound: mpsc::Sender<OutboundFrame>,
    pub inbound: mpsc::Receiver<InboundFrame>,
}

impl EventLink {
    /// Create a link plus the far ends of its two queues.
    pub fn pair(
        capacity: usize,
    ) -> (
        Self,
        mpsc::Receiver<OutboundFrame>,
        mpsc::Sender<InboundFrame>,
    ) {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let (in_tx, in_rx) = mpsc::channel(capacity);
        (
            Self {
                outbound: out_tx,
                inbound: in_rx,
            },
            out_rx,
            in_tx,
        )
    }

    pub async fn send(&self, frame: OutboundFrame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed("event link writer is gone".into()))
    }
}
