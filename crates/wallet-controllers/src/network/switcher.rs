use std::sync::Arc;
use std::time::Duration;

use chain_eth::rpc::RpcError;
use parking_lot::RwLock;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::ProviderEngineConfig;
use crate::error::Result;
use crate::network::verifier::NetworkIdentityVerifier;
use crate::provider::{Provider, ProviderAccessor, ProviderFactory, ProviderSlot, ProviderTarget};
use crate::store::Store;
use crate::types::{NetworkState, ProviderConfig};

/// Owns the active provider and swaps it out on reconfiguration.
///
/// Replaced providers are stopped after a grace period. Dependents never hold
/// a provider across a switch: they go through a [`ProviderAccessor`].
pub struct NetworkSwitcher {
    slot: Arc<ProviderSlot>,
    factory: Arc<dyn ProviderFactory>,
    engine: RwLock<ProviderEngineConfig>,
    retire_delay: Duration,
    verifier: Arc<NetworkIdentityVerifier>,
}

impl NetworkSwitcher {
    pub fn new(
        factory: Arc<dyn ProviderFactory>,
        engine: ProviderEngineConfig,
        retire_delay: Duration,
        state: Arc<Store<NetworkState>>,
    ) -> Self {
        let slot: Arc<ProviderSlot> = Arc::new(RwLock::new(None));
        let verifier = Arc::new(NetworkIdentityVerifier::new(ProviderAccessor::new(&slot), state));
        Self {
            slot,
            factory,
            engine: RwLock::new(engine),
            retire_delay,
            verifier,
        }
    }

    pub fn accessor(&self) -> ProviderAccessor {
        ProviderAccessor::new(&self.slot)
    }

    pub fn current(&self) -> Option<Arc<dyn Provider>> {
        self.slot.read().clone()
    }

    pub fn verifier(&self) -> &Arc<NetworkIdentityVerifier> {
        &self.verifier
    }

    pub fn set_engine_config(&self, engine: ProviderEngineConfig) {
        *self.engine.write() = engine;
    }

    /// Builds a provider for `config` and makes it the active one.
    ///
    /// Nothing changes when the config is invalid or the factory fails.
    pub fn configure(&self, config: &ProviderConfig) -> Result<()> {
        let target = ProviderTarget::from_config(config)?;
        let provider = {
            let engine = self.engine.read();
            self.factory.create(&target, &engine)?
        };
        info!(network = %config.network_type, "configured provider");
        self.switch_active_provider(provider);
        Ok(())
    }

    /// Installs `provider`, re-arms verification, and retires the previous
    /// provider after the grace period.
    pub fn switch_active_provider(&self, provider: Arc<dyn Provider>) {
        self.register_error_hook(provider.as_ref());
        let previous = self.slot.write().replace(provider);
        self.verifier.rearm();
        if let Some(previous) = previous {
            self.retire(previous);
        }
    }

    /// Stops the active provider immediately.
    pub fn shutdown(&self) {
        if let Some(provider) = self.slot.write().take() {
            provider.stop();
            debug!("active provider stopped");
        }
    }

    fn register_error_hook(&self, provider: &dyn Provider) {
        let verifier = Arc::downgrade(&self.verifier);
        let registered_on = Handle::try_current().ok();
        provider.on_error(Box::new(move |err: &RpcError| {
            warn!(error = %err, "provider reported a transport error");
            let Some(verifier) = verifier.upgrade() else {
                return;
            };
            // Prefer the runtime the error is reported on.
            match Handle::try_current().ok().or_else(|| registered_on.clone()) {
                Some(handle) => {
                    handle.spawn(async move { verifier.verify_network().await });
                }
                None => warn!("no runtime to re-verify the network on, skipping"),
            }
        }));
    }

    fn retire(&self, provider: Arc<dyn Provider>) {
        let delay = self.retire_delay;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    provider.stop();
                    debug!("retired provider stopped");
                });
            }
            Err(_) => {
                warn!("no runtime for the retire delay, stopping replaced provider now");
                provider.stop();
            }
        }
    }
}
