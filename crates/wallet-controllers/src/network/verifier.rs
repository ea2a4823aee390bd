use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chain_eth::rpc::{self, BlockHeader, RpcRequest};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::Result;
use crate::provider::{query, ProviderAccessor};
use crate::store::Store;
use crate::types::{NetworkProperties, NetworkState, NetworkStatus};

/// Answers "which network is the active provider on" without ever having two
/// identity queries in flight at once.
pub struct NetworkIdentityVerifier {
    accessor: ProviderAccessor,
    state: Arc<Store<NetworkState>>,
    lock: Mutex<()>,
    /// Bumped on every re-arm; results gathered under an older epoch are
    /// dropped.
    epoch: AtomicU64,
}

impl NetworkIdentityVerifier {
    pub fn new(accessor: ProviderAccessor, state: Arc<Store<NetworkState>>) -> Self {
        Self {
            accessor,
            state,
            lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    /// Queries `net_version` and publishes the result.
    ///
    /// Concurrent callers queue on the lock; each runs its own query only after
    /// the previous one has published. A failed query publishes `loading`.
    pub async fn lookup_network(&self) {
        if self.accessor.current().is_none() {
            return;
        }

        let _guard = self.lock.lock().await;
        let Some(provider) = self.accessor.current() else {
            return;
        };
        let epoch = self.epoch.load(Ordering::SeqCst);

        let status = match query(provider.as_ref(), RpcRequest::net_version()).await {
            Ok(value) => match rpc::parse_network_id(&value) {
                Some(id) => NetworkStatus::Id(id),
                None => {
                    warn!(%value, "net_version returned a non-numeric id");
                    NetworkStatus::Unknown
                }
            },
            Err(err) => {
                warn!(error = %err, "network lookup failed");
                NetworkStatus::Loading
            }
        };

        if self.epoch.load(Ordering::SeqCst) != epoch {
            debug!(%status, "discarding lookup result from a replaced provider");
            return;
        }
        self.state.update(|s| NetworkState {
            network: status,
            ..s.clone()
        });
    }

    /// Whether the current network prices gas with a base fee.
    ///
    /// A cached `true` is returned without a query. A cached `false` is *not*
    /// trusted and the latest block is fetched again; networks move to the fee
    /// market but never back. Without a provider the answer is `false`.
    pub async fn check_fee_market_compatibility(&self) -> Result<bool> {
        let cached = self.state.state().properties.is_eip1559_compatible;
        if cached == Some(true) {
            return Ok(true);
        }
        let Some(provider) = self.accessor.current() else {
            return Ok(false);
        };
        let epoch = self.epoch.load(Ordering::SeqCst);

        let block = query(provider.as_ref(), RpcRequest::latest_block()).await?;
        let compatible = BlockHeader::from_value(block)?.supports_fee_market();

        if cached != Some(compatible) && self.epoch.load(Ordering::SeqCst) == epoch {
            self.state.update(|s| NetworkState {
                properties: NetworkProperties {
                    is_eip1559_compatible: Some(compatible),
                },
                ..s.clone()
            });
        }
        Ok(compatible)
    }

    /// Re-runs the lookup, but only while the status is still `loading`.
    pub async fn verify_network(&self) {
        if self.state.state().network.is_loading() {
            self.lookup_network().await;
        }
    }

    /// Forgets what was learned about the previous provider.
    ///
    /// Listeners are notified even when the state was already `loading`, so
    /// anything holding a provider lease re-reads it after a switch.
    pub fn rearm(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        let published = self.state.update(|s| NetworkState {
            network: NetworkStatus::Loading,
            properties: NetworkProperties::default(),
            ..s.clone()
        });
        if !published {
            self.state.announce();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;
    use crate::provider::{Provider, ProviderSlot};
    use chain_eth::rpc::{RpcError, ETH_GET_BLOCK_BY_NUMBER, NET_VERSION};
    use parking_lot::RwLock;
    use serde_json::json;

    struct Fixture {
        _slot: Arc<ProviderSlot>,
        provider: Arc<MockProvider>,
        state: Arc<Store<NetworkState>>,
        verifier: Arc<NetworkIdentityVerifier>,
    }

    fn fixture(provider: MockProvider) -> Fixture {
        let provider = Arc::new(provider);
        let dyn_provider: Arc<dyn Provider> = provider.clone();
        let slot: Arc<ProviderSlot> = Arc::new(RwLock::new(Some(dyn_provider)));
        let state = Arc::new(Store::new(
            "NetworkController",
            NetworkState::default(),
            NetworkState::default(),
        ));
        let verifier = Arc::new(NetworkIdentityVerifier::new(
            ProviderAccessor::new(&slot),
            Arc::clone(&state),
        ));
        Fixture {
            _slot: slot,
            provider,
            state,
            verifier,
        }
    }

    #[tokio::test]
    async fn lookup_publishes_network_id() {
        let f = fixture(MockProvider::new().with_result(NET_VERSION, json!("3")));
        f.verifier.lookup_network().await;
        assert_eq!(f.state.state().network, NetworkStatus::Id(3));
    }

    #[tokio::test]
    async fn lookup_error_publishes_loading() {
        let f = fixture(MockProvider::new().with_error(NET_VERSION, RpcError::Timeout));
        f.state.update(|s| NetworkState {
            network: NetworkStatus::Id(1),
            ..s.clone()
        });
        f.verifier.lookup_network().await;
        assert_eq!(f.state.state().network, NetworkStatus::Loading);
    }

    #[tokio::test]
    async fn non_numeric_id_is_unknown() {
        let f = fixture(MockProvider::new().with_result(NET_VERSION, json!("devnet")));
        f.verifier.lookup_network().await;
        assert_eq!(f.state.state().network, NetworkStatus::Unknown);
    }

    #[tokio::test]
    async fn lookup_without_provider_is_a_no_op() {
        let state = Arc::new(Store::new(
            "NetworkController",
            NetworkState::default(),
            NetworkState::default(),
        ));
        let verifier = NetworkIdentityVerifier::new(ProviderAccessor::detached(), Arc::clone(&state));
        verifier.lookup_network().await;
        assert_eq!(state.state().network, NetworkStatus::Loading);
        assert!(!verifier.check_fee_market_compatibility().await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_lookups_run_one_after_another() {
        let f = fixture(MockProvider::new().with_result(NET_VERSION, json!("1")));
        let gate = f.provider.hold_next(NET_VERSION);

        let first = tokio::spawn({
            let verifier = Arc::clone(&f.verifier);
            async move { verifier.lookup_network().await }
        });
        let second = tokio::spawn({
            let verifier = Arc::clone(&f.verifier);
            async move { verifier.lookup_network().await }
        });

        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(f.provider.events(), vec!["begin net_version"]);

        gate.open();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(
            f.provider.events(),
            vec![
                "begin net_version",
                "end net_version",
                "begin net_version",
                "end net_version"
            ]
        );
        assert_eq!(f.state.state().network, NetworkStatus::Id(1));
    }

    #[tokio::test]
    async fn rearm_discards_in_flight_result() {
        let f = fixture(MockProvider::new().with_result(NET_VERSION, json!("5")));
        let gate = f.provider.hold_next(NET_VERSION);

        let pending = tokio::spawn({
            let verifier = Arc::clone(&f.verifier);
            async move { verifier.lookup_network().await }
        });
        tokio::task::yield_now().await;

        f.verifier.rearm();
        gate.open();
        pending.await.unwrap();
        assert_eq!(f.state.state().network, NetworkStatus::Loading);
    }

    #[tokio::test]
    async fn rearm_while_loading_still_notifies() {
        let f = fixture(MockProvider::new());
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        f.state.subscribe(move |_: &NetworkState, _: &[crate::store::Patch]| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(f.state.state().network.is_loading());
        f.verifier.rearm();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fee_market_detected_from_base_fee() {
        let f = fixture(
            MockProvider::new()
                .with_result(ETH_GET_BLOCK_BY_NUMBER, json!({ "number": "0x1", "baseFeePerGas": "0x7" })),
        );
        assert!(f.verifier.check_fee_market_compatibility().await.unwrap());
        assert_eq!(f.state.state().properties.is_eip1559_compatible, Some(true));
    }

    #[tokio::test]
    async fn confirmed_fee_market_is_never_requeried() {
        let f = fixture(
            MockProvider::new()
                .with_result(ETH_GET_BLOCK_BY_NUMBER, json!({ "number": "0x1", "baseFeePerGas": "0x7" })),
        );
        for _ in 0..3 {
            assert!(f.verifier.check_fee_market_compatibility().await.unwrap());
        }
        assert_eq!(f.provider.call_count(ETH_GET_BLOCK_BY_NUMBER), 1);
    }

    #[tokio::test]
    async fn legacy_result_is_requeried() {
        let f = fixture(
            MockProvider::new().with_result(ETH_GET_BLOCK_BY_NUMBER, json!({ "number": "0x1" })),
        );
        assert!(!f.verifier.check_fee_market_compatibility().await.unwrap());
        assert_eq!(f.state.state().properties.is_eip1559_compatible, Some(false));

        f.provider.set_result(
            ETH_GET_BLOCK_BY_NUMBER,
            json!({ "number": "0x2", "baseFeePerGas": "0x1" }),
        );
        assert!(f.verifier.check_fee_market_compatibility().await.unwrap());
        assert_eq!(f.provider.call_count(ETH_GET_BLOCK_BY_NUMBER), 2);
    }

    #[tokio::test]
    async fn block_query_error_propagates() {
        let f = fixture(MockProvider::new().with_error(ETH_GET_BLOCK_BY_NUMBER, RpcError::Timeout));
        assert!(f.verifier.check_fee_market_compatibility().await.is_err());
        assert_eq!(f.state.state().properties.is_eip1559_compatible, None);
    }

    #[tokio::test]
    async fn verify_only_runs_while_loading() {
        let f = fixture(MockProvider::new().with_result(NET_VERSION, json!("1")));
        f.verifier.verify_network().await;
        assert_eq!(f.provider.call_count(NET_VERSION), 1);

        f.verifier.verify_network().await;
        assert_eq!(f.provider.call_count(NET_VERSION), 1);
    }
}
