//! Gas fee estimates, kept fresh by polling.
//!
//! Networks and accounts that support the fee market get tiered
//! base-fee/priority-fee estimates from a [`GasFeeEstimator`]; everything else
//! gets a single legacy gas price read from the node.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chain_eth::rpc::{self, RpcRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::config::GasFeeConfig;
use crate::error::{ControllerError, Result};
use crate::polling::{PollingCoordinator, Refresh};
use crate::provider::{query, Provider, ProviderSource};
use crate::store::{ChangeFeed, Patch, Store, SubscriptionId};
use crate::types::PollToken;

/// One fee tier. Fee amounts are GWEI decimal strings, wait times are in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Eip1559GasFee {
    pub min_wait_time_estimate: u64,
    pub max_wait_time_estimate: u64,
    pub suggested_max_priority_fee_per_gas: String,
    pub suggested_max_fee_per_gas: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeMarketEstimates {
    pub low: Eip1559GasFee,
    pub medium: Eip1559GasFee,
    pub high: Eip1559GasFee,
    /// Expected base fee of the next block, GWEI.
    pub estimated_base_fee: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegacyGasPriceEstimate {
    /// GWEI decimal string.
    pub gas_price: String,
}

/// Persisted without a tag: an empty estimate is stored as `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GasFeeEstimates {
    FeeMarket(FeeMarketEstimates),
    Legacy(LegacyGasPriceEstimate),
    Empty {},
}

impl Default for GasFeeEstimates {
    fn default() -> Self {
        GasFeeEstimates::Empty {}
    }
}

impl GasFeeEstimates {
    pub fn is_empty(&self) -> bool {
        matches!(self, GasFeeEstimates::Empty {})
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GasFeeState {
    pub gas_fee_estimates: GasFeeEstimates,
}

/// Where estimates come from.
#[async_trait]
pub trait GasFeeEstimator: Send + Sync {
    async fn fetch_gas_estimates(&self) -> Result<FeeMarketEstimates>;

    /// Defaults to the node's `eth_gasPrice`.
    async fn fetch_legacy_gas_price_estimate(
        &self,
        provider: &dyn Provider,
    ) -> Result<LegacyGasPriceEstimate> {
        legacy_gas_price_estimate(provider).await
    }
}

/// Reads `eth_gasPrice` and converts it from wei to GWEI.
pub async fn legacy_gas_price_estimate(provider: &dyn Provider) -> Result<LegacyGasPriceEstimate> {
    let value = query(provider, RpcRequest::gas_price()).await?;
    let wei = rpc::quantity_from_value(&value)?;
    Ok(LegacyGasPriceEstimate {
        gas_price: rpc::wei_to_gwei_decimal(wei),
    })
}

/// Whether the current network supports the fee market.
#[async_trait]
pub trait FeeMarketSupport: Send + Sync {
    async fn supports_fee_market(&self) -> Result<bool>;
}

pub type AccountCompatibility = Arc<dyn Fn() -> bool + Send + Sync>;

pub struct GasFeeOptions {
    pub config: GasFeeConfig,
    pub initial_state: Option<GasFeeState>,
    pub estimator: Arc<dyn GasFeeEstimator>,
    pub network_compatibility: Arc<dyn FeeMarketSupport>,
    /// Whether the selected account can send fee-market transactions. Assumed
    /// `true` when absent.
    pub account_compatibility: Option<AccountCompatibility>,
    pub provider_source: Arc<dyn ProviderSource>,
}

struct GasFeeInner {
    store: Store<GasFeeState>,
    estimator: Arc<dyn GasFeeEstimator>,
    network_compatibility: Arc<dyn FeeMarketSupport>,
    account_compatibility: Option<AccountCompatibility>,
    source: Arc<dyn ProviderSource>,
    provider: RwLock<Option<Arc<dyn Provider>>>,
}

impl GasFeeInner {
    fn rebuild_provider(&self) {
        *self.provider.write() = self.source.provider();
    }

    async fn fee_market_compatible(&self) -> bool {
        let network = match self.network_compatibility.supports_fee_market().await {
            Ok(supported) => supported,
            Err(err) => {
                error!(error = %err, "fee market check failed, assuming legacy pricing");
                false
            }
        };
        let account = self.account_compatibility.as_ref().map_or(true, |check| check());
        network && account
    }
}

#[async_trait]
impl Refresh for GasFeeInner {
    type Output = GasFeeState;

    async fn fetch(&self) -> Result<GasFeeState> {
        let gas_fee_estimates = if self.fee_market_compatible().await {
            GasFeeEstimates::FeeMarket(self.estimator.fetch_gas_estimates().await?)
        } else {
            let provider = self
                .provider
                .read()
                .clone()
                .ok_or(ControllerError::ProviderUnavailable)?;
            GasFeeEstimates::Legacy(
                self.estimator
                    .fetch_legacy_gas_price_estimate(provider.as_ref())
                    .await?,
            )
        };
        Ok(GasFeeState { gas_fee_estimates })
    }

    fn commit(&self, output: GasFeeState) {
        self.store.set(output);
    }

    fn reset(&self) {
        self.store.reset();
    }
}

/// Polls gas fee estimates for any number of interested consumers.
pub struct GasFeeController {
    inner: Arc<GasFeeInner>,
    poller: PollingCoordinator<GasFeeInner>,
}

impl GasFeeController {
    /// `network_changes` is followed for the life of the controller: every
    /// notification rebuilds the provider lease used for legacy estimates.
    pub fn new(options: GasFeeOptions, network_changes: &dyn ChangeFeed) -> Self {
        let inner = Arc::new(GasFeeInner {
            store: Store::new(
                "GasFeeController",
                GasFeeState::default(),
                options.initial_state.unwrap_or_default(),
            ),
            estimator: options.estimator,
            network_compatibility: options.network_compatibility,
            account_compatibility: options.account_compatibility,
            source: options.provider_source,
            provider: RwLock::new(None),
        });
        inner.rebuild_provider();

        let weak: Weak<GasFeeInner> = Arc::downgrade(&inner);
        network_changes.on_change(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.rebuild_provider();
                debug!("gas fee provider lease rebuilt");
            }
        }));

        let poller = PollingCoordinator::new(
            "GasFeeController",
            options.config.interval(),
            Arc::clone(&inner),
        );
        Self { inner, poller }
    }

    pub fn state(&self) -> Arc<GasFeeState> {
        self.inner.store.state()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&GasFeeState, &[Patch]) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.store.subscribe(listener)
    }

    /// Registers a consumer. The first one gets fresh estimates before this
    /// returns.
    pub async fn get_gas_fee_estimates_and_start_polling(
        &self,
        token: Option<PollToken>,
    ) -> Result<PollToken> {
        self.poller.start_polling(token).await
    }

    /// Fetches estimates now and stores them. On failure the previous
    /// estimates are kept. Returns the resulting state either way.
    pub async fn fetch_gas_fee_estimate_data(&self) -> Arc<GasFeeState> {
        match self.inner.fetch().await {
            Ok(state) => self.inner.commit(state),
            Err(err) => warn!(error = %err, "gas fee estimate fetch failed"),
        }
        self.state()
    }

    pub fn disconnect_poller(&self, token: &PollToken) {
        self.poller.stop_polling_by_token(token);
    }

    pub fn stop_polling(&self) {
        self.poller.stop_polling();
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    pub fn destroy(&self) {
        self.poller.destroy();
        self.inner.store.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use crate::store::Store;
    use chain_eth::rpc::{RpcError, ETH_GAS_PRICE};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn tier(priority: &str, max: &str) -> Eip1559GasFee {
        Eip1559GasFee {
            min_wait_time_estimate: 15_000,
            max_wait_time_estimate: 60_000,
            suggested_max_priority_fee_per_gas: priority.into(),
            suggested_max_fee_per_gas: max.into(),
        }
    }

    fn estimates() -> FeeMarketEstimates {
        FeeMarketEstimates {
            low: tier("1", "35"),
            medium: tier("1.5", "40"),
            high: tier("2", "55"),
            estimated_base_fee: "32".into(),
        }
    }

    #[derive(Default)]
    struct FakeEstimator {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl GasFeeEstimator for FakeEstimator {
        async fn fetch_gas_estimates(&self) -> Result<FeeMarketEstimates> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(ControllerError::Estimation("estimates api down".into()));
            }
            Ok(estimates())
        }
    }

    struct FakeNetwork(Mutex<Result<bool>>);

    #[async_trait]
    impl FeeMarketSupport for FakeNetwork {
        async fn supports_fee_market(&self) -> Result<bool> {
            self.0.lock().clone()
        }
    }

    struct Harness {
        controller: GasFeeController,
        estimator: Arc<FakeEstimator>,
        network: Arc<FakeNetwork>,
        provider: Arc<MockProvider>,
        slot: Arc<RwLock<Option<Arc<dyn Provider>>>>,
        network_store: Store<u32>,
    }

    struct SlotSource(Arc<RwLock<Option<Arc<dyn Provider>>>>);

    impl ProviderSource for SlotSource {
        fn provider(&self) -> Option<Arc<dyn Provider>> {
            self.0.read().clone()
        }
    }

    fn harness(network_supports: Result<bool>, account: Option<bool>) -> Harness {
        let estimator = Arc::new(FakeEstimator::default());
        let network = Arc::new(FakeNetwork(Mutex::new(network_supports)));
        let provider = Arc::new(MockProvider::new().with_result(ETH_GAS_PRICE, json!("0x5d21dba00")));
        let dyn_provider: Arc<dyn Provider> = provider.clone();
        let slot = Arc::new(RwLock::new(Some(dyn_provider)));
        let network_store = Store::new("NetworkController", 0u32, 0u32);

        let controller = GasFeeController::new(
            GasFeeOptions {
                config: GasFeeConfig::default(),
                initial_state: None,
                estimator: estimator.clone(),
                network_compatibility: network.clone(),
                account_compatibility: account.map(|a| Arc::new(move || a) as AccountCompatibility),
                provider_source: Arc::new(SlotSource(Arc::clone(&slot))),
            },
            &network_store,
        );
        Harness {
            controller,
            estimator,
            network,
            provider,
            slot,
            network_store,
        }
    }

    #[tokio::test]
    async fn fee_market_network_gets_tiered_estimates() {
        let h = harness(Ok(true), None);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert_eq!(state.gas_fee_estimates, GasFeeEstimates::FeeMarket(estimates()));
        assert_eq!(h.provider.call_count(ETH_GAS_PRICE), 0);
    }

    #[tokio::test]
    async fn legacy_network_gets_gas_price_in_gwei() {
        let h = harness(Ok(false), None);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert_eq!(
            state.gas_fee_estimates,
            GasFeeEstimates::Legacy(LegacyGasPriceEstimate {
                gas_price: "25".into()
            })
        );
        assert_eq!(h.estimator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn incompatible_account_forces_legacy() {
        let h = harness(Ok(true), Some(false));
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert!(matches!(state.gas_fee_estimates, GasFeeEstimates::Legacy(_)));
    }

    #[tokio::test]
    async fn failing_network_check_counts_as_legacy() {
        let h = harness(Err(ControllerError::Rpc(RpcError::Timeout)), None);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert!(matches!(state.gas_fee_estimates, GasFeeEstimates::Legacy(_)));
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_estimates() {
        let h = harness(Ok(true), None);
        h.controller.fetch_gas_fee_estimate_data().await;

        h.estimator.fail.store(true, Ordering::SeqCst);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert_eq!(state.gas_fee_estimates, GasFeeEstimates::FeeMarket(estimates()));
    }

    #[tokio::test]
    async fn provider_lease_follows_network_changes() {
        let h = harness(Ok(false), None);
        let replacement = Arc::new(MockProvider::new().with_result(ETH_GAS_PRICE, json!("0x3b9aca00")));
        let dyn_replacement: Arc<dyn Provider> = replacement.clone();
        *h.slot.write() = Some(dyn_replacement);

        // Lease is only rebuilt on notification.
        h.controller.fetch_gas_fee_estimate_data().await;
        assert_eq!(h.provider.call_count(ETH_GAS_PRICE), 1);

        h.network_store.set(1);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert_eq!(replacement.call_count(ETH_GAS_PRICE), 1);
        assert_eq!(
            state.gas_fee_estimates,
            GasFeeEstimates::Legacy(LegacyGasPriceEstimate { gas_price: "1".into() })
        );
    }

    #[tokio::test]
    async fn missing_provider_keeps_state() {
        let h = harness(Ok(false), None);
        *h.slot.write() = None;
        h.network_store.set(1);
        let state = h.controller.fetch_gas_fee_estimate_data().await;
        assert!(state.gas_fee_estimates.is_empty());
    }

    #[tokio::test]
    async fn legacy_gas_price_error_propagates() {
        let provider = MockProvider::new().with_error(ETH_GAS_PRICE, RpcError::Timeout);
        let err = legacy_gas_price_estimate(&provider).await.unwrap_err();
        assert_eq!(err, ControllerError::Rpc(RpcError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn polling_lifecycle() {
        let h = harness(Ok(true), None);
        let a = h
            .controller
            .get_gas_fee_estimates_and_start_polling(None)
            .await
            .unwrap();
        let b = h
            .controller
            .get_gas_fee_estimates_and_start_polling(None)
            .await
            .unwrap();
        assert_eq!(h.estimator.calls.load(Ordering::SeqCst), 1);
        assert!(h.controller.is_polling());

        tokio::time::sleep(Duration::from_millis(15_001)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(h.estimator.calls.load(Ordering::SeqCst), 2);

        h.controller.disconnect_poller(&a);
        assert!(h.controller.is_polling());
        h.controller.disconnect_poller(&b);
        assert!(!h.controller.is_polling());
        assert_eq!(*h.controller.state(), GasFeeState::default());
    }

    #[tokio::test(start_paused = true)]
    async fn network_switch_to_fee_market_is_picked_up() {
        let h = harness(Ok(false), None);
        h.controller
            .get_gas_fee_estimates_and_start_polling(None)
            .await
            .unwrap();
        assert!(matches!(h.controller.state().gas_fee_estimates, GasFeeEstimates::Legacy(_)));

        *h.network.0.lock() = Ok(true);
        tokio::time::sleep(Duration::from_millis(15_001)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            h.controller.state().gas_fee_estimates,
            GasFeeEstimates::FeeMarket(_)
        ));
    }

    #[tokio::test]
    async fn destroy_stops_everything() {
        let h = harness(Ok(true), None);
        h.controller
            .get_gas_fee_estimates_and_start_polling(None)
            .await
            .unwrap();
        h.controller.destroy();
        assert!(!h.controller.is_polling());
        assert_eq!(
            h.controller.get_gas_fee_estimates_and_start_polling(None).await,
            Err(ControllerError::Destroyed)
        );
    }

    #[test]
    fn state_serializes_in_wire_shape() {
        let empty = serde_json::to_value(GasFeeState::default()).unwrap();
        assert_eq!(empty, json!({ "gasFeeEstimates": {} }));
        let back: GasFeeState = serde_json::from_value(empty).unwrap();
        assert!(back.gas_fee_estimates.is_empty());

        let legacy = GasFeeState {
            gas_fee_estimates: GasFeeEstimates::Legacy(LegacyGasPriceEstimate {
                gas_price: "25".into(),
            }),
        };
        let value = serde_json::to_value(&legacy).unwrap();
        assert_eq!(value, json!({ "gasFeeEstimates": { "gasPrice": "25" } }));
        let back: GasFeeState = serde_json::from_value(value).unwrap();
        assert_eq!(back, legacy);
    }
}
