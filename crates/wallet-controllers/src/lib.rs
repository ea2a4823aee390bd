//! Wallet state controllers.
//!
//! Keeps a wallet's view of the chain fresh:
//! - [`NetworkController`] owns the network config and the one active
//!   provider, and works out which network that provider is actually on
//! - [`GasFeeController`] polls gas fee estimates
//! - [`AccountTrackerController`] polls account balances
//!
//! Each controller publishes immutable state snapshots through a [`Store`].
//! Polling is reference-counted through [`PollToken`]s so independent
//! consumers can share one timer.

pub mod account_tracker;
pub mod config;
pub mod error;
pub mod gas_fee;
pub mod mock;
pub mod network;
pub mod polling;
pub mod provider;
pub mod store;
pub mod types;

pub use account_tracker::{AccountInformation, AccountTrackerController, AccountTrackerState};
pub use config::{
    AccountTrackerConfig, ControllersConfig, GasFeeConfig, NetworkControllerConfig,
    ProviderEngineConfig,
};
pub use error::{ControllerError, Result};
pub use gas_fee::{
    FeeMarketSupport, GasFeeController, GasFeeEstimates, GasFeeEstimator, GasFeeOptions,
    GasFeeState,
};
pub use network::{NetworkController, NetworkIdentityVerifier, NetworkSwitcher};
pub use polling::{PollingCoordinator, Refresh};
pub use provider::{Provider, ProviderAccessor, ProviderFactory, ProviderSource, ProviderTarget};
pub use store::{ChangeFeed, Patch, PatchOp, Store, SubscriptionId};
pub use types::{NetworkProperties, NetworkState, NetworkStatus, PollToken, ProviderConfig};

pub use chain_eth::NetworkType;
