//! Provider abstraction: the JSON-RPC transport the controllers poll.
//!
//! Transports are supplied from outside through [`ProviderFactory`]. The
//! controllers only need three things from them: send a request, report
//! transport errors, and stop.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chain_eth::chains::{NetworkType, LOCALHOST_RPC_URL};
use chain_eth::rpc::{RpcError, RpcRequest};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::config::ProviderEngineConfig;
use crate::error::{ControllerError, Result};
use crate::types::ProviderConfig;

/// Callback invoked with low-level transport errors.
pub type ErrorHandler = Box<dyn Fn(&RpcError) + Send + Sync>;

/// A live JSON-RPC transport.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn send(&self, request: RpcRequest) -> Result<Value, RpcError>;

    /// Registers a handler for transport errors raised outside of `send`.
    fn on_error(&self, handler: ErrorHandler);

    /// Shuts the transport down. Requests issued afterwards fail.
    fn stop(&self);
}

/// What kind of transport to build for a [`ProviderConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderTarget {
    /// Hosted transport for a named chain.
    Named(NetworkType),
    /// Plain JSON-RPC endpoint.
    Standard {
        rpc_url: String,
        chain_id: Option<u64>,
        ticker: Option<String>,
        nickname: Option<String>,
    },
}

impl ProviderTarget {
    /// Validates a config and picks the transport family for it.
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        match config.network_type {
            NetworkType::Localhost => Ok(ProviderTarget::Standard {
                rpc_url: LOCALHOST_RPC_URL.to_string(),
                chain_id: None,
                ticker: None,
                nickname: None,
            }),
            NetworkType::Rpc => Ok(ProviderTarget::Standard {
                rpc_url: config.require_rpc_target()?.to_string(),
                chain_id: config.chain_id,
                ticker: config.ticker.clone(),
                nickname: config.nickname.clone(),
            }),
            named if named.is_named() => Ok(ProviderTarget::Named(named)),
            other => Err(ControllerError::InvalidNetworkType(other.to_string())),
        }
    }
}

/// Builds transports. Implemented by whoever owns the real HTTP/WS stack.
pub trait ProviderFactory: Send + Sync {
    fn create(
        &self,
        target: &ProviderTarget,
        engine: &ProviderEngineConfig,
    ) -> Result<Arc<dyn Provider>>;
}

pub(crate) type ProviderSlot = RwLock<Option<Arc<dyn Provider>>>;

/// Non-owning view of a switcher's active provider.
///
/// Each call to [`current`](Self::current) hands out a lease on whatever
/// provider is installed at that moment; holding the accessor never keeps a
/// retired provider alive.
#[derive(Clone)]
pub struct ProviderAccessor {
    slot: Weak<ProviderSlot>,
}

impl ProviderAccessor {
    pub(crate) fn new(slot: &Arc<ProviderSlot>) -> Self {
        Self {
            slot: Arc::downgrade(slot),
        }
    }

    /// An accessor that never yields a provider.
    pub fn detached() -> Self {
        Self { slot: Weak::new() }
    }

    pub fn current(&self) -> Option<Arc<dyn Provider>> {
        self.slot.upgrade().and_then(|slot| slot.read().clone())
    }
}

impl std::fmt::Debug for ProviderAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderAccessor")
            .field("attached", &(self.slot.strong_count() > 0))
            .finish()
    }
}

/// Anything a derived-state controller can read its provider from.
pub trait ProviderSource: Send + Sync {
    fn provider(&self) -> Option<Arc<dyn Provider>>;
}

impl ProviderSource for ProviderAccessor {
    fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.current()
    }
}

impl ProviderSource for Arc<dyn Provider> {
    fn provider(&self) -> Option<Arc<dyn Provider>> {
        Some(Arc::clone(self))
    }
}

/// Sends one request and logs the outcome at debug level.
pub async fn query(provider: &dyn Provider, request: RpcRequest) -> Result<Value> {
    let method = request.method.clone();
    match provider.send(request).await {
        Ok(value) => {
            debug!(%method, "rpc request completed");
            Ok(value)
        }
        Err(err) => {
            debug!(%method, error = %err, "rpc request failed");
            Err(err.into())
        }
    }
}
