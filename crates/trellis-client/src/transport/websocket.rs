//! WebSocket event transport

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, warn};
use trellis_protocol::InboundFrame;

use super::{EventLink, EventTransport};
use crate::config::ClientConfig;
use crate::error::TransportError;

const LINK_CAPACITY: usize = 256;

/// JSON text frames over a WebSocket.
///
/// Each connection gets a writer pump and a reader pump bridging the socket
/// to the [`EventLink`] queues.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
    token: Option<String>,
}

impl WebSocketTransport {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: config.event_url.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl EventTransport for WebSocketTransport {
    async fn connect(&self) -> Result<EventLink, TransportError> {
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| tungstenite::Error::HttpFormat(e.into()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request).await?;
        debug!(url = %self.url, "Event socket connected");

        let (mut sink, mut source) = stream.split();
        let (link, mut outbound_rx, inbound_tx) = EventLink::pair(LINK_CAPACITY);

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                let text = match serde_json::to_string(&frame) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, ?frame, "Dropping unserialisable frame");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    debug!(error = %e, "Event socket write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = source.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<InboundFrame>(text.as_str()) {
                            Ok(frame) => {
                                if inbound_tx.send(frame).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => warn!(error = %e, "Skipping unparseable event frame"),
                        }
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(?reason, "Event socket closed by server");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        debug!(error = %e, "Event socket read failed");
                        break;
                    }
                }
            }
        });

        Ok(link)
    }
}
