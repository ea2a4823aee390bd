//! Controller configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid config.
//! Durations are given in milliseconds.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{ControllerError, Result};

/// Options handed to the [`ProviderFactory`](crate::provider::ProviderFactory)
/// every time a transport is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEngineConfig {
    /// Project key for hosted named-chain transports.
    pub infura_project_id: Option<String>,
    /// How often the transport's block tracker polls for new blocks.
    pub block_polling_interval_ms: u64,
    /// Extra transport-specific settings passed through untouched.
    pub params: Map<String, Value>,
}

impl Default for ProviderEngineConfig {
    fn default() -> Self {
        Self {
            infura_project_id: None,
            block_polling_interval_ms: 12_000,
            params: Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkControllerConfig {
    /// Grace period before a replaced provider is stopped, so requests already
    /// in flight on it can land.
    pub provider_retire_delay_ms: u64,
    pub engine: ProviderEngineConfig,
}

impl Default for NetworkControllerConfig {
    fn default() -> Self {
        Self {
            provider_retire_delay_ms: 500,
            engine: ProviderEngineConfig::default(),
        }
    }
}

impl NetworkControllerConfig {
    pub fn provider_retire_delay(&self) -> Duration {
        Duration::from_millis(self.provider_retire_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasFeeConfig {
    pub interval_ms: u64,
}

impl Default for GasFeeConfig {
    fn default() -> Self {
        Self { interval_ms: 15_000 }
    }
}

impl GasFeeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountTrackerConfig {
    pub interval_ms: u64,
}

impl Default for AccountTrackerConfig {
    fn default() -> Self {
        Self { interval_ms: 10_000 }
    }
}

impl AccountTrackerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// All controller settings in one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllersConfig {
    pub network: NetworkControllerConfig,
    pub gas_fee: GasFeeConfig,
    pub account_tracker: AccountTrackerConfig,
}

impl ControllersConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ControllersConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ControllerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Polling intervals must be positive; a zero period would spin.
    pub fn validate(&self) -> Result<()> {
        if self.gas_fee.interval_ms == 0 {
            return Err(ControllerError::Config("gas_fee.interval_ms must be > 0".into()));
        }
        if self.account_tracker.interval_ms == 0 {
            return Err(ControllerError::Config(
                "account_tracker.interval_ms must be > 0".into(),
            ));
        }
        if self.network.engine.block_polling_interval_ms == 0 {
            return Err(ControllerError::Config(
                "network.engine.block_polling_interval_ms must be > 0".into(),
            ));
        }
        Ok(())
    }
}
