//! Connection manager for the event stream.
//!
//! A single actor task owns the [`EventLink`]: it is the only reader and the
//! only writer. Subscribe and unsubscribe requests arrive as commands and are
//! processed one at a time, so a reconnect (including the replay of every
//! registered channel) completes before the next command is looked at.
//!
//! ```text
//! Disconnected -> Connecting -> Connected
//!                     ^  |          |
//!                     |  v          v
//!                  Reconnecting <---+        any -> Closed on shutdown
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use trellis_protocol::{ChannelName, InboundFrame, OutboundFrame};

use crate::config::{ClientConfig, HeartbeatConfig, ReconnectConfig};
use crate::error::{ClientError, ConnectionError, Result};
use crate::multiplexer::Multiplexer;
use crate::transport::{EventLink, EventTransport};

const COMMAND_CAPACITY: usize = 64;

/// Lifecycle of the event connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Exponential backoff with jitter between reconnect attempts.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt.
    ///
    /// The base doubles (by `multiplier`) up to `max_delay`; jitter then
    /// shortens it by up to `jitter * base`, so the result never exceeds the
    /// maximum.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let initial = self.config.initial_delay_ms as f64;
        let max = self.config.max_delay_ms as f64;
        let exponent = self.attempt.min(32) as i32;
        let base = (initial * self.config.multiplier.powi(exponent)).min(max);
        let jittered = base * (1.0 - self.config.jitter * rand::random::<f64>());
        self.attempt = self.attempt.saturating_add(1);
        Duration::from_millis(jittered.max(1.0) as u64)
    }

    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }

    pub(crate) fn attempts(&self) -> u32 {
        self.attempt
    }
}

enum Command {
    Subscribe {
        channel: ChannelName,
        ack: oneshot::Sender<()>,
    },
    Unsubscribe {
        channel: ChannelName,
        ack: oneshot::Sender<()>,
    },
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Handle to a running connection actor.
pub(crate) struct ConnectionHandle {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Spawn the actor on the current runtime. It starts connecting at once.
    pub(crate) fn spawn(
        transport: Arc<dyn EventTransport>,
        multiplexer: Arc<Multiplexer>,
        config: &ClientConfig,
        state: Arc<watch::Sender<ConnectionState>>,
    ) -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_CAPACITY);
        let actor = Actor {
            transport,
            multiplexer,
            inbox,
            state,
            token: config.token.clone(),
            handshake_timeout: config.handshake_timeout(),
            heartbeat: config.heartbeat.clone(),
            backoff: Backoff::new(config.reconnect.clone()),
            server_channels: HashSet::new(),
        };
        let task = tokio::spawn(actor.run());
        Self { commands, task }
    }

    /// Make sure the server is subscribed to `channel` if it has listeners.
    ///
    /// Resolves once the actor has processed the request. While the link is
    /// down this only records intent; the replay after the next handshake
    /// sends the frame.
    pub(crate) async fn subscribe(&self, channel: ChannelName) -> Result<()> {
        self.request(|ack| Command::Subscribe { channel, ack }).await
    }

    /// Drop the server subscription for `channel` if it has no listeners left.
    pub(crate) async fn unsubscribe(&self, channel: ChannelName) -> Result<()> {
        self.request(|ack| Command::Unsubscribe { channel, ack }).await
    }

    /// Stop the actor, cancelling any pending reconnect, and wait for it.
    pub(crate) async fn shutdown(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(Command::Shutdown { ack }).await.is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            warn!(error = %e, "Connection task ended abnormally");
        }
    }

    async fn request(&self, command: impl FnOnce(oneshot::Sender<()>) -> Command) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| ClientError::Closed)?;
        done.await.map_err(|_| ClientError::Closed)
    }
}

enum Exit {
    Shutdown(Option<oneshot::Sender<()>>),
    Lost(ConnectionError),
}

struct Actor {
    transport: Arc<dyn EventTransport>,
    multiplexer: Arc<Multiplexer>,
    inbox: mpsc::Receiver<Command>,
    state: Arc<watch::Sender<ConnectionState>>,
    token: Option<String>,
    handshake_timeout: Duration,
    heartbeat: HeartbeatConfig,
    backoff: Backoff,
    /// Channels the server currently has a subscription for on this link
    server_channels: HashSet<ChannelName>,
}

impl Actor {
    async fn run(mut self) {
        let ack = loop {
            self.set_state(ConnectionState::Connecting);
            let attempt = handshake(
                Arc::clone(&self.transport),
                self.token.clone(),
                self.handshake_timeout,
            );
            tokio::pin!(attempt);

            let outcome = loop {
                tokio::select! {
                    result = &mut attempt => break Ok(result),
                    command = self.inbox.recv() => {
                        if let Some(exit) = self.on_idle_command(command) {
                            break Err(exit);
                        }
                    }
                }
            };

            let failure = match outcome {
                Err(Exit::Shutdown(ack)) => break ack,
                Err(Exit::Lost(e)) | Ok(Err(e)) => e,
                Ok(Ok(link)) => {
                    self.backoff.reset();
                    match self.serve(link).await {
                        Exit::Shutdown(ack) => break ack,
                        Exit::Lost(e) => e,
                    }
                }
            };

            self.server_channels.clear();
            self.set_state(ConnectionState::Reconnecting);
            let delay = self.backoff.next_delay();
            warn!(
                error = %failure,
                attempt = self.backoff.attempts(),
                delay_ms = delay.as_millis() as u64,
                "Event connection lost, scheduling reconnect"
            );
            if let Some(Exit::Shutdown(ack)) = self.idle(delay).await {
                break ack;
            }
        };

        self.set_state(ConnectionState::Closed);
        info!("Event connection closed");
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
    }

    /// Wait out a backoff delay while still answering commands.
    async fn idle(&mut self, delay: Duration) -> Option<Exit> {
        let wake = tokio::time::sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return None,
                command = self.inbox.recv() => {
                    if let Some(exit) = self.on_idle_command(command) {
                        return Some(exit);
                    }
                }
            }
        }
    }

    /// Commands arriving while no link is up. Subscriptions are picked up by
    /// the replay after the next handshake, so only shutdown matters here.
    fn on_idle_command(&mut self, command: Option<Command>) -> Option<Exit> {
        match command {
            Some(Command::Subscribe { ack, .. }) | Some(Command::Unsubscribe { ack, .. }) => {
                let _ = ack.send(());
                None
            }
            Some(Command::Shutdown { ack }) => Some(Exit::Shutdown(Some(ack))),
            None => Some(Exit::Shutdown(None)),
        }
    }

    async fn serve(&mut self, mut link: EventLink) -> Exit {
        if let Err(e) = self.replay(&link).await {
            return Exit::Lost(e);
        }
        self.set_state(ConnectionState::Connected);
        info!(channels = self.server_channels.len(), "Event connection established");

        let interval = self.heartbeat.interval();
        let probe_timeout = self.heartbeat.timeout();
        let mut last_seen = Instant::now();
        let mut probe_deadline: Option<Instant> = None;

        loop {
            let wake = probe_deadline.unwrap_or(last_seen + interval);
            tokio::select! {
                frame = link.inbound.recv() => {
                    let Some(frame) = frame else {
                        return Exit::Lost(ConnectionError::StreamClosed);
                    };
                    last_seen = Instant::now();
                    probe_deadline = None;
                    self.on_frame(frame);
                }
                command = self.inbox.recv() => {
                    let (channel, ack) = match command {
                        Some(Command::Subscribe { channel, ack })
                        | Some(Command::Unsubscribe { channel, ack }) => (channel, ack),
                        Some(Command::Shutdown { ack }) => return Exit::Shutdown(Some(ack)),
                        None => return Exit::Shutdown(None),
                    };
                    let synced = self.sync_channel(&link, channel).await;
                    let _ = ack.send(());
                    if let Err(e) = synced {
                        return Exit::Lost(e);
                    }
                }
                _ = tokio::time::sleep_until(wake) => {
                    if probe_deadline.is_some() {
                        return Exit::Lost(ConnectionError::HeartbeatTimeout(probe_timeout));
                    }
                    debug!("Event stream idle, sending heartbeat probe");
                    if let Err(e) = link.send(OutboundFrame::Ping).await {
                        return Exit::Lost(e.into());
                    }
                    probe_deadline = Some(Instant::now() + probe_timeout);
                }
            }
        }
    }

    /// Subscribe the fresh link to every channel that has listeners.
    async fn replay(&mut self, link: &EventLink) -> std::result::Result<(), ConnectionError> {
        for channel in self.multiplexer.channels() {
            link.send(OutboundFrame::Subscribe {
                channel: channel.clone(),
            })
            .await?;
            debug!(channel = %channel, "Subscription replayed");
            self.server_channels.insert(channel);
        }
        Ok(())
    }

    /// Bring the server side of `channel` in line with the listener table.
    async fn sync_channel(
        &mut self,
        link: &EventLink,
        channel: ChannelName,
    ) -> std::result::Result<(), ConnectionError> {
        let wanted = self.multiplexer.has_listeners(&channel);
        let subscribed = self.server_channels.contains(&channel);
        if wanted && !subscribed {
            link.send(OutboundFrame::Subscribe {
                channel: channel.clone(),
            })
            .await?;
            debug!(channel = %channel, "Subscribed");
            self.server_channels.insert(channel);
        } else if !wanted && subscribed {
            self.server_channels.remove(&channel);
            link.send(OutboundFrame::Unsubscribe {
                channel: channel.clone(),
            })
            .await?;
            debug!(channel = %channel, "Unsubscribed");
        }
        Ok(())
    }

    fn on_frame(&self, frame: InboundFrame) {
        match frame {
            InboundFrame::Event { channel, payload } => {
                let delivered = self.multiplexer.dispatch(&channel, payload);
                debug!(channel = %channel, listeners = delivered, "Event received");
            }
            InboundFrame::Pong => debug!("Heartbeat answered"),
            InboundFrame::Welcome { .. } => debug!("Ignoring repeated welcome"),
            InboundFrame::Error { message } => warn!(%message, "Server reported an error"),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Connection state changed");
        }
    }
}

/// Connect, authenticate if a token is configured, and wait for `welcome`.
async fn handshake(
    transport: Arc<dyn EventTransport>,
    token: Option<String>,
    timeout: Duration,
) -> std::result::Result<EventLink, ConnectionError> {
    tokio::time::timeout(timeout, open_link(transport, token))
        .await
        .map_err(|_| ConnectionError::HandshakeTimeout(timeout))?
}

async fn open_link(
    transport: Arc<dyn EventTransport>,
    token: Option<String>,
) -> std::result::Result<EventLink, ConnectionError> {
    let mut link = transport.connect().await?;
    if let Some(token) = token {
        link.send(OutboundFrame::Authenticate { token }).await?;
    }
    match link.inbound.recv().await {
        Some(InboundFrame::Welcome { session }) => {
            debug!(?session, "Handshake completed");
            Ok(link)
        }
        Some(InboundFrame::Error { message }) => Err(ConnectionError::Rejected(message)),
        Some(other) => Err(ConnectionError::UnexpectedFrame(format!("{other:?}"))),
        None => Err(ConnectionError::StreamClosed),
    }
}
