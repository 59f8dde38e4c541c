//! Frames exchanged on the persistent event stream.
//!
//! Every frame is a JSON object tagged by `"op"`:
//!
//! ```text
//! client -> server   {"op":"auth","token":"…"}
//!                    {"op":"subscribe","channel":"project:123"}
//!                    {"op":"unsubscribe","channel":"project:123"}
//!                    {"op":"ping"}
//! server -> client   {"op":"welcome"}
//!                    {"op":"event","channel":"project:123","payload":{…}}
//!                    {"op":"pong"}
//!                    {"op":"error","message":"…"}
//! ```

use std::borrow::Borrow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::InvalidArgument;

/// Name of an event feed. Only non-emptiness is checked; the format belongs
/// to the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidArgument> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(InvalidArgument::new("channel", "must not be empty"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for ChannelName {
    type Error = InvalidArgument;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl TryFrom<&str> for ChannelName {
    type Error = InvalidArgument;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ChannelName> for String {
    fn from(value: ChannelName) -> Self {
        value.0
    }
}

impl AsRef<str> for ChannelName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ChannelName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event as handed to listeners.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelEvent {
    pub channel: ChannelName,
    pub payload: Value,
    pub received_at: DateTime<Utc>,
}

impl ChannelEvent {
    pub fn new(channel: ChannelName, payload: Value) -> Self {
        Self {
            channel,
            payload,
            received_at: Utc::now(),
        }
    }

    /// The `type` field most platform payloads carry, if present.
    pub fn event_type(&self) -> Option<&str> {
        self.payload.get("type").and_then(Value::as_str)
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum OutboundFrame {
    #[serde(rename = "auth")]
    Authenticate { token: String },
    Subscribe { channel: ChannelName },
    Unsubscribe { channel: ChannelName },
    Ping,
}

impl fmt::Debug for OutboundFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Authenticate { .. } => f.write_str("Authenticate { token: <redacted> }"),
            Self::Subscribe { channel } => write!(f, "Subscribe({channel})"),
            Self::Unsubscribe { channel } => write!(f, "Unsubscribe({channel})"),
            Self::Ping => f.write_str("Ping"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum InboundFrame {
    Welcome {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session: Option<String>,
    },
    Event {
        channel: ChannelName,
        #[serde(default)]
        payload: Value,
    },
    Pong,
    Error {
        message: String,
    },
}
