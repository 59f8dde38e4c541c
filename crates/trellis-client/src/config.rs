//! Configuration for the middleware
//!
//! Loaded from TOML, overridable from the environment:
//!
//! ```toml
//! base_url = "https://cloud.example.io"
//! event_url = "wss://events.example.io/ws"
//! schema = "project"
//! token = "…"
//! request_timeout_ms = 30000
//! worker_pool_size = 4
//! listener_queue_capacity = 1024
//!
//! [heartbeat]
//! interval_ms = 30000
//! timeout_ms = 10000
//!
//! [reconnect]
//! initial_delay_ms = 500
//! max_delay_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

pub const ENV_BASE_URL: &str = "TRELLIS_BASE_URL";
pub const ENV_EVENT_URL: &str = "TRELLIS_EVENT_URL";
pub const ENV_TOKEN: &str = "TRELLIS_TOKEN";

/// Keepalive settings for the event connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Inbound silence after which a probe is sent
    pub interval_ms: u64,
    /// Time a probe may go unanswered before reconnecting
    pub timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 10_000,
        }
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Backoff between reconnect attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// Fraction of each delay shaved off at random, in `[0, 1]`
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            max_delay_ms: 30_000,
            multiplier: 2.0,
            jitter: 0.2,
        }
    }
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Configuration for a [`Middleware`](crate::Middleware) instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Root of the query API
    pub base_url: String,
    /// Path segment selecting the query schema (`project`, `player`, …)
    pub schema: String,
    /// Event stream endpoint
    pub event_url: String,
    /// Pre-acquired bearer credential
    pub token: Option<String>,
    /// Default deadline for awaited calls; none when absent
    pub request_timeout_ms: Option<u64>,
    pub handshake_timeout_ms: u64,
    /// Workers running completion handlers
    pub worker_pool_size: usize,
    /// Events buffered per listener before the oldest is dropped
    pub listener_queue_capacity: usize,
    pub heartbeat: HeartbeatConfig,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            schema: "project".to_string(),
            event_url: "ws://localhost:8080/events".to_string(),
            token: None,
            request_timeout_ms: Some(30_000),
            handshake_timeout_ms: 10_000,
            worker_pool_size: 4,
            listener_queue_capacity: 1024,
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }

    /// Load from a TOML file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            ClientConfig::invalid(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::from_toml_str(&source)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `TRELLIS_*` environment variables when set.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(ENV_BASE_URL) {
            self.base_url = url;
        }
        if let Ok(url) = std::env::var(ENV_EVENT_URL) {
            self.event_url = url;
        }
        if let Ok(token) = std::env::var(ENV_TOKEN) {
            self.token = Some(token);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(Self::invalid("base_url must not be empty"));
        }
        if self.event_url.trim().is_empty() {
            return Err(Self::invalid("event_url must not be empty"));
        }
        if self.schema.trim().is_empty() {
            return Err(Self::invalid("schema must not be empty"));
        }
        if self.worker_pool_size == 0 {
            return Err(Self::invalid("worker_pool_size must be at least 1"));
        }
        if self.listener_queue_capacity == 0 {
            return Err(Self::invalid("listener_queue_capacity must be at least 1"));
        }
        if self.request_timeout_ms == Some(0) {
            return Err(Self::invalid("request_timeout_ms must be non-zero when set"));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(Self::invalid("handshake_timeout_ms must be non-zero"));
        }
        if self.heartbeat.interval_ms == 0 || self.heartbeat.timeout_ms == 0 {
            return Err(Self::invalid("heartbeat interval and timeout must be non-zero"));
        }
        let reconnect = &self.reconnect;
        if reconnect.initial_delay_ms == 0 || reconnect.initial_delay_ms > reconnect.max_delay_ms {
            return Err(Self::invalid(
                "reconnect delays must satisfy 0 < initial_delay_ms <= max_delay_ms",
            ));
        }
        if reconnect.multiplier < 1.0 {
            return Err(Self::invalid("reconnect multiplier must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&reconnect.jitter) {
            return Err(Self::invalid("reconnect jitter must be within [0, 1]"));
        }
        Ok(())
    }

    /// Full URL the request transport posts to.
    pub fn query_endpoint(&self) -> String {
        format!("{}/graphql/{}", self.base_url.trim_end_matches('/'), self.schema)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    fn invalid(message: impl Into<String>) -> ClientError {
        ClientError::InvalidConfig(message.into())
    }
}

/// Builder for ClientConfig
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    base_url: Option<String>,
    schema: Option<String>,
    event_url: Option<String>,
    token: Option<String>,
    request_timeout: Option<Option<Duration>>,
    handshake_timeout: Option<Duration>,
    worker_pool_size: Option<usize>,
    listener_queue_capacity: Option<usize>,
    heartbeat: Option<HeartbeatConfig>,
    reconnect: Option<ReconnectConfig>,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn event_url(mut self, url: impl Into<String>) -> Self {
        self.event_url = Some(url.into());
        self
    }

    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// `None` disables the default deadline for awaited calls.
    pub fn request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    pub fn worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = Some(size);
        self
    }

    pub fn listener_queue_capacity(mut self, capacity: usize) -> Self {
        self.listener_queue_capacity = Some(capacity);
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = Some(reconnect);
        self
    }

    /// Build the configuration, validating it.
    pub fn build(self) -> Result<ClientConfig> {
        let defaults = ClientConfig::default();
        let config = ClientConfig {
            base_url: self.base_url.unwrap_or(defaults.base_url),
            schema: self.schema.unwrap_or(defaults.schema),
            event_url: self.event_url.unwrap_or(defaults.event_url),
            token: self.token.or(defaults.token),
            request_timeout_ms: match self.request_timeout {
                Some(timeout) => timeout.map(|t| (t.as_millis() as u64).max(1)),
                None => defaults.request_timeout_ms,
            },
            handshake_timeout_ms: self
                .handshake_timeout
                .map(|t| (t.as_millis() as u64).max(1))
                .unwrap_or(defaults.handshake_timeout_ms),
            worker_pool_size: self.worker_pool_size.unwrap_or(defaults.worker_pool_size),
            listener_queue_capacity: self
                .listener_queue_capacity
                .unwrap_or(defaults.listener_queue_capacity),
            heartbeat: self.heartbeat.unwrap_or(defaults.heartbeat),
            reconnect: self.reconnect.unwrap_or(defaults.reconnect),
        };
        config.validate()?;
        Ok(config)
    }
}
