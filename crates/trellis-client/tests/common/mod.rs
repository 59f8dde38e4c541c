#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use trellis_client::transport::{EventLink, EventTransport, RequestTransport};
use trellis_client::{
    ChannelEvent, ChannelName, ClientConfig, HeartbeatConfig, Middleware, ReconnectConfig,
    TransportError,
};
use trellis_client::protocol::{InboundFrame, OutboundFrame, WireCall};

/// Config with short heartbeat and backoff so reconnect tests stay fast.
pub fn fast_config() -> ClientConfig {
    ClientConfig::builder()
        .request_timeout(None)
        .handshake_timeout(Duration::from_millis(500))
        .heartbeat(HeartbeatConfig {
            interval_ms: 100,
            timeout_ms: 100,
        })
        .reconnect(ReconnectConfig {
            initial_delay_ms: 20,
            max_delay_ms: 100,
            multiplier: 2.0,
            jitter: 0.0,
        })
        .build()
        .expect("valid test config")
}

pub fn middleware(requests: ScriptedRequests, events: EventServer) -> Middleware {
    Middleware::builder(fast_config())
        .request_transport(requests)
        .event_transport(events)
        .build()
        .expect("middleware builds")
}

/// Poll `condition` until it holds or two seconds pass.
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Wait until the live connection is subscribed to exactly `channels`.
pub async fn wait_subscribed(server: &EventServer, channels: &[&str]) {
    let mut expected: Vec<String> = channels.iter().map(|c| c.to_string()).collect();
    expected.sort();
    eventually("server subscriptions", || {
        let mut subscribed = server.subscribed();
        subscribed.sort();
        server.has_live_connection() && subscribed == expected
    })
    .await;
}

/// Listener that records every event it sees.
pub fn collector() -> (
    impl Fn(&ChannelEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    Arc<Mutex<Vec<ChannelEvent>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let listener = move |event: &ChannelEvent| -> anyhow::Result<()> {
        sink.lock().push(event.clone());
        Ok(())
    };
    (listener, seen)
}

pub fn payloads(seen: &Arc<Mutex<Vec<ChannelEvent>>>) -> Vec<Value> {
    seen.lock().iter().map(|e| e.payload.clone()).collect()
}

#[derive(Clone)]
enum Reply {
    Body(String),
    Fail(String),
    Stall(Duration, String),
}

/// Request transport answering each operation from a script.
#[derive(Clone, Default)]
pub struct ScriptedRequests {
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    calls: Arc<Mutex<Vec<WireCall>>>,
}

impl ScriptedRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, operation: &str, body: impl Into<String>) -> Self {
        self.replies
            .lock()
            .insert(operation.to_string(), Reply::Body(body.into()));
        self
    }

    pub fn fail(self, operation: &str, reason: &str) -> Self {
        self.replies
            .lock()
            .insert(operation.to_string(), Reply::Fail(reason.to_string()));
        self
    }

    pub fn stall(self, operation: &str, delay: Duration, body: impl Into<String>) -> Self {
        self.replies
            .lock()
            .insert(operation.to_string(), Reply::Stall(delay, body.into()));
        self
    }

    pub fn calls(&self) -> Vec<WireCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl RequestTransport for ScriptedRequests {
    async fn execute(&self, call: &WireCall) -> Result<String, TransportError> {
        self.calls.lock().push(call.clone());
        let reply = self.replies.lock().get(call.operation.as_str()).cloned();
        match reply {
            Some(Reply::Body(body)) => Ok(body),
            Some(Reply::Fail(reason)) => Err(TransportError::Closed(reason)),
            Some(Reply::Stall(delay, body)) => {
                tokio::time::sleep(delay).await;
                Ok(body)
            }
            None => Err(TransportError::Closed(format!(
                "no reply scripted for {}",
                call.operation
            ))),
        }
    }
}

#[derive(Default)]
struct ServerState {
    /// Frames received, one list per accepted connection
    connections: Vec<Vec<OutboundFrame>>,
    /// Sender for the live connection
    live: Option<mpsc::Sender<InboundFrame>>,
}

/// In-memory event server. Greets every connection with `welcome`, records
/// what the client sends and answers pings unless told otherwise.
#[derive(Clone, Default)]
pub struct EventServer {
    state: Arc<Mutex<ServerState>>,
    connects: Arc<AtomicUsize>,
    mute: Arc<AtomicBool>,
    refuse: Arc<AtomicBool>,
}

impl EventServer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Stop answering pings.
    pub fn mute_pongs(&self, mute: bool) {
        self.mute.store(mute, Ordering::SeqCst);
    }

    /// Make every connect attempt fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Close the live connection from the server side.
    pub fn drop_connection(&self) {
        self.state.lock().live = None;
    }

    pub async fn emit(&self, channel: &str, payload: Value) {
        let live = self.state.lock().live.clone();
        let live = live.expect("no live connection to emit on");
        live.send(InboundFrame::Event {
            channel: ChannelName::new(channel).expect("valid channel"),
            payload,
        })
        .await
        .expect("client side of the link is gone");
    }

    /// Channels the latest connection is subscribed to, in subscription order.
    pub fn subscribed(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut channels: Vec<String> = Vec::new();
        for frame in state.connections.last().into_iter().flatten() {
            match frame {
                OutboundFrame::Subscribe { channel } => channels.push(channel.to_string()),
                OutboundFrame::Unsubscribe { channel } => {
                    channels.retain(|c| c != channel.as_str())
                }
                _ => {}
            }
        }
        channels
    }

    pub fn frames(&self, connection: usize) -> Vec<OutboundFrame> {
        self.state
            .lock()
            .connections
            .get(connection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_live_connection(&self) -> bool {
        self.state.lock().live.is_some()
    }
}

#[async_trait]
impl EventTransport for EventServer {
    async fn connect(&self) -> Result<EventLink, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("connection refused".into()));
        }

        let (link, mut from_client, to_client) = EventLink::pair(64);
        to_client
            .try_send(InboundFrame::Welcome {
                session: Some("test-session".into()),
            })
            .expect("fresh link has capacity");

        let index = {
            let mut state = self.state.lock();
            state.connections.push(Vec::new());
            state.live = Some(to_client.clone());
            state.connections.len() - 1
        };

        // Only a weak handle, so that dropping `live` closes the link.
        let pong = to_client.downgrade();
        drop(to_client);
        let state = Arc::clone(&self.state);
        let mute = Arc::clone(&self.mute);
        tokio::spawn(async move {
            while let Some(frame) = from_client.recv().await {
                let is_ping = frame == OutboundFrame::Ping;
                state.lock().connections[index].push(frame);
                if is_ping && !mute.load(Ordering::SeqCst) {
                    if let Some(sender) = pong.upgrade() {
                        let _ = sender.send(InboundFrame::Pong).await;
                    }
                }
            }
        });

        Ok(link)
    }
}
