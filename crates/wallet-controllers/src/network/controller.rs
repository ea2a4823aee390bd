use std::sync::Arc;

use async_trait::async_trait;
use chain_eth::NetworkType;
use tracing::info;

use crate::config::{NetworkControllerConfig, ProviderEngineConfig};
use crate::error::Result;
use crate::gas_fee::FeeMarketSupport;
use crate::network::switcher::NetworkSwitcher;
use crate::provider::{Provider, ProviderAccessor, ProviderFactory, ProviderTarget};
use crate::store::{Patch, Store, SubscriptionId};
use crate::types::{NetworkProperties, NetworkState, NetworkStatus, ProviderConfig};

/// Owns network configuration and the single active provider.
///
/// The provider is not built until [`set_provider_config`] hands over the
/// engine options; until then every provider-backed call is a no-op.
///
/// [`set_provider_config`]: NetworkController::set_provider_config
pub struct NetworkController {
    state: Arc<Store<NetworkState>>,
    switcher: NetworkSwitcher,
}

impl NetworkController {
    pub fn new(
        config: NetworkControllerConfig,
        initial_state: Option<NetworkState>,
        factory: Arc<dyn ProviderFactory>,
    ) -> Self {
        let state = Arc::new(Store::new(
            "NetworkController",
            NetworkState::default(),
            initial_state.unwrap_or_default(),
        ));
        let switcher = NetworkSwitcher::new(
            factory,
            config.engine.clone(),
            config.provider_retire_delay(),
            Arc::clone(&state),
        );
        Self { state, switcher }
    }

    pub fn state(&self) -> Arc<NetworkState> {
        self.state.state()
    }

    /// The store backing [`state`](Self::state), for listeners and feeds.
    pub fn store(&self) -> &Arc<Store<NetworkState>> {
        &self.state
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&NetworkState, &[Patch]) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.state.subscribe(listener)
    }

    /// Lease handle on the active provider for dependent controllers.
    pub fn provider_accessor(&self) -> ProviderAccessor {
        self.switcher.accessor()
    }

    pub fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.switcher.current()
    }

    /// Supplies the transport options and builds the first provider from the
    /// current [`ProviderConfig`]. Later calls rebuild it with the new options.
    pub async fn set_provider_config(&self, engine: ProviderEngineConfig) -> Result<()> {
        self.switcher.set_engine_config(engine);
        let provider = self.state().provider.clone();
        self.initialize_provider(&provider)?;
        self.lookup_network().await;
        Ok(())
    }

    /// Switches to a built-in network, using its table chain ID and ticker.
    pub async fn set_provider_type(&self, network_type: NetworkType) -> Result<()> {
        self.change_provider(ProviderConfig::named(network_type)).await
    }

    /// Switches to a user-supplied RPC endpoint.
    pub async fn set_rpc_target(
        &self,
        rpc_target: impl Into<String>,
        chain_id: Option<u64>,
        ticker: Option<String>,
        nickname: Option<String>,
    ) -> Result<()> {
        self.change_provider(ProviderConfig::rpc(rpc_target, chain_id, ticker, nickname))
            .await
    }

    /// Resets the status to `loading` and rebuilds the provider from the
    /// current config.
    pub async fn refresh_network(&self) -> Result<()> {
        self.state.update(|s| NetworkState {
            network: NetworkStatus::Loading,
            properties: NetworkProperties::default(),
            ..s.clone()
        });
        let provider = self.state().provider.clone();
        self.initialize_provider(&provider)?;
        self.lookup_network().await;
        Ok(())
    }

    pub async fn lookup_network(&self) {
        self.switcher.verifier().lookup_network().await;
    }

    pub async fn get_eip1559_compatibility(&self) -> Result<bool> {
        self.switcher.verifier().check_fee_market_compatibility().await
    }

    /// Stops the active provider and detaches all listeners.
    pub fn destroy(&self) {
        self.switcher.shutdown();
        self.state.destroy();
    }

    async fn change_provider(&self, provider: ProviderConfig) -> Result<()> {
        ProviderTarget::from_config(&provider)?;
        info!(network = %provider.network_type, "switching network");
        self.state.update(|s| NetworkState {
            provider,
            ..s.clone()
        });
        if self.switcher.current().is_none() {
            // Not configured yet: the engine options are still to come.
            return Ok(());
        }
        self.refresh_network().await
    }

    fn initialize_provider(&self, provider: &ProviderConfig) -> Result<()> {
        self.switcher.configure(provider)?;
        let is_custom_network = provider.is_custom_network();
        self.state.update(|s| NetworkState {
            is_custom_network,
            ..s.clone()
        });
        Ok(())
    }
}

#[async_trait]
impl FeeMarketSupport for NetworkController {
    async fn supports_fee_market(&self) -> Result<bool> {
        self.get_eip1559_compatibility().await
    }
}
