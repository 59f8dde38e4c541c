//! Typed channel names for the platform's event feeds.
//!
//! Any string is accepted as a channel by `subscribe`; these types only build
//! the names the platform publishes on.

use trellis_protocol::ChannelName;

use crate::error::Result;

/// Something that names an event channel.
pub trait Channel {
    fn channel(&self) -> Result<ChannelName>;
}

/// Events for one project: `project:{uuid}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectChannel {
    pub project: String,
}

impl ProjectChannel {
    pub fn new(project: impl Into<String>) -> Self {
        Self {
            project: project.into(),
        }
    }
}

impl Channel for ProjectChannel {
    fn channel(&self) -> Result<ChannelName> {
        Ok(ChannelName::new(format!("project:{}", self.project))?)
    }
}

/// Events for one player of a project: `project:{uuid}:player:{id}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerChannel {
    pub project: String,
    pub player: String,
}

impl PlayerChannel {
    pub fn new(project: impl Into<String>, player: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            player: player.into(),
        }
    }
}

impl Channel for PlayerChannel {
    fn channel(&self) -> Result<ChannelName> {
        Ok(ChannelName::new(format!(
            "project:{}:player:{}",
            self.project, self.player
        ))?)
    }
}

/// `asset:{id}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetChannel {
    pub asset: String,
}

impl AssetChannel {
    pub fn new(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
        }
    }
}

impl Channel for AssetChannel {
    fn channel(&self) -> Result<ChannelName> {
        Ok(ChannelName::new(format!("asset:{}", self.asset))?)
    }
}

/// `wallet:{address}`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletChannel {
    pub address: String,
}

impl WalletChannel {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl Channel for WalletChannel {
    fn channel(&self) -> Result<ChannelName> {
        Ok(ChannelName::new(format!("wallet:{}", self.address))?)
    }
}

impl Channel for ChannelName {
    fn channel(&self) -> Result<ChannelName> {
        Ok(self.clone())
    }
}

impl Channel for str {
    fn channel(&self) -> Result<ChannelName> {
        Ok(ChannelName::new(self)?)
    }
}

impl Channel for String {
    fn channel(&self) -> Result<ChannelName> {
        self.as_str().channel()
    }
}
