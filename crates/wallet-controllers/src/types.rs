use std::fmt;

use chain_eth::chains::{self, NetworkType};
use serde::{Deserialize, Serialize};

use crate::error::ControllerError;

/// Which network the provider should talk to, and how to present it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub network_type: NetworkType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_target: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub ticker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
}

impl ProviderConfig {
    /// Config for a network type with its table chain ID and ticker.
    pub fn named(network_type: NetworkType) -> Self {
        Self {
            network_type,
            rpc_target: None,
            chain_id: network_type.chain_id(),
            ticker: Some(network_type.ticker().to_string()),
            nickname: None,
        }
    }

    /// Config for a user-supplied RPC endpoint.
    pub fn rpc(
        rpc_target: impl Into<String>,
        chain_id: Option<u64>,
        ticker: Option<String>,
        nickname: Option<String>,
    ) -> Self {
        Self {
            network_type: NetworkType::Rpc,
            rpc_target: Some(rpc_target.into()),
            chain_id,
            ticker,
            nickname,
        }
    }

    /// The RPC URL, required and non-empty for `rpc` networks.
    pub fn require_rpc_target(&self) -> Result<&str, ControllerError> {
        match self.rpc_target.as_deref() {
            Some(url) if !url.trim().is_empty() => Ok(url),
            _ => Err(ControllerError::MissingRpcTarget),
        }
    }

    pub fn is_custom_network(&self) -> bool {
        chains::is_custom_network(self.chain_id)
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::named(NetworkType::Mainnet)
    }
}

/// Result of the last network identity check.
///
/// `Loading` doubles as "re-verifying": it is what a failed lookup publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum NetworkStatus {
    #[default]
    Loading,
    Id(u64),
    Unknown,
}

impl NetworkStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, NetworkStatus::Loading)
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkStatus::Loading => f.write_str("loading"),
            NetworkStatus::Id(id) => write!(f, "{id}"),
            NetworkStatus::Unknown => f.write_str("unknown"),
        }
    }
}

impl TryFrom<String> for NetworkStatus {
    type Error = ControllerError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "loading" => Ok(NetworkStatus::Loading),
            "unknown" => Ok(NetworkStatus::Unknown),
            other => other
                .parse()
                .map(NetworkStatus::Id)
                .map_err(|_| ControllerError::InvalidResponse(format!("network status {other}"))),
        }
    }
}

impl From<NetworkStatus> for String {
    fn from(value: NetworkStatus) -> Self {
        value.to_string()
    }
}

/// Capabilities discovered on the current network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkProperties {
    /// `None` until a block header has been inspected.
    #[serde(default, rename = "isEIP1559Compatible")]
    pub is_eip1559_compatible: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkState {
    pub network: NetworkStatus,
    pub is_custom_network: bool,
    pub provider: ProviderConfig,
    pub properties: NetworkProperties,
}

/// Opaque handle for one subscriber's interest in a polling loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PollToken(String);

impl PollToken {
    pub fn generate() -> Self {
        PollToken(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PollToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for PollToken {
    fn from(value: String) -> Self {
        PollToken(value)
    }
}

impl From<&str> for PollToken {
    fn from(value: &str) -> Self {
        PollToken(value.to_string())
    }
}
