//! Platform data carriers returned by the built-in operations.
//!
//! These mirror the server's JSON field names and carry no behaviour. Every
//! field is optional because the server only returns what a query selects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Asset {
    pub id: Option<String>,
    pub name: Option<String>,
    pub state_data: Option<serde_json::Value>,
    pub config_data: Option<serde_json::Value>,
    pub variant_mode: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Balance {
    pub project: Option<String>,
    pub wallet: Option<String>,
    pub asset_id: Option<String>,
    pub asset_index: Option<String>,
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Platform {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub network: Option<String>,
    pub contracts: Option<serde_json::Value>,
    pub notifications: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GasPrices {
    pub safe_low: Option<f64>,
    pub average: Option<f64>,
    pub fast: Option<f64>,
    pub fastest: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub uuid: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// State of a transaction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestState {
    Pending,
    Broadcast,
    TpProcessing,
    Executed,
    CanceledUser,
    CanceledPlatform,
    Dropped,
    Failed,
}

impl RequestState {
    /// No further transitions will happen.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Executed | Self::CanceledUser | Self::CanceledPlatform | Self::Dropped | Self::Failed
        )
    }
}

/// A transaction request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Request {
    pub id: Option<i64>,
    pub transaction_id: Option<String>,
    pub title: Option<String>,
    pub contract: Option<String>,
    #[serde(rename = "type")]
    pub request_type: Option<String>,
    pub value: Option<String>,
    pub state: Option<RequestState>,
    pub accepted: Option<bool>,
    pub project_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Wallet {
    pub eth_address: Option<String>,
    pub enj_allowance: Option<f64>,
    pub enj_balance: Option<f64>,
    pub eth_balance: Option<f64>,
    pub assets_created: Option<Vec<Asset>>,
    pub balances: Option<Vec<Balance>>,
    pub transactions: Option<Vec<Request>>,
}
