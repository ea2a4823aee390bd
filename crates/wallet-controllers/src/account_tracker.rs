//! Ether balances for the wallet's accounts.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chain_eth::address;
use chain_eth::rpc::{self, RpcRequest};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::config::AccountTrackerConfig;
use crate::error::Result;
use crate::polling::{PollingCoordinator, Refresh};
use crate::provider::{query, Provider, ProviderSource};
use crate::store::{ChangeFeed, Patch, Store, SubscriptionId};
use crate::types::PollToken;

const ZERO_BALANCE: &str = "0x0";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInformation {
    /// Wei, as a hex quantity.
    pub balance: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTrackerState {
    /// Keyed by lowercase address.
    pub accounts: BTreeMap<String, AccountInformation>,
}

/// Lists the addresses the wallet currently knows about.
pub type Identities = Arc<dyn Fn() -> Vec<String> + Send + Sync>;

struct TrackerInner {
    store: Store<AccountTrackerState>,
    identities: Identities,
    source: RwLock<Option<Arc<dyn ProviderSource>>>,
}

impl TrackerInner {
    fn provider(&self) -> Option<Arc<dyn Provider>> {
        self.source.read().as_ref().and_then(|source| source.provider())
    }

    fn tracked_addresses(&self) -> Vec<String> {
        let mut addresses: Vec<String> = (self.identities)()
            .iter()
            .filter_map(|raw| match address::normalize_address(raw) {
                Ok(normalized) => Some(normalized),
                Err(err) => {
                    warn!(address = %raw, error = %err, "skipping invalid identity");
                    None
                }
            })
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    async fn refresh_now(&self) {
        match self.fetch().await {
            Ok(output) => self.commit(output),
            Err(err) => warn!(error = %err, "balance refresh failed"),
        }
    }
}

async fn fetch_balance(provider: &dyn Provider, address: &str) -> Result<String> {
    let value = query(provider, RpcRequest::balance(address)).await?;
    Ok(rpc::to_quantity(rpc::quantity_from_value(&value)?))
}

#[async_trait]
impl Refresh for TrackerInner {
    /// `None` when there was no provider to ask.
    type Output = Option<AccountTrackerState>;

    async fn fetch(&self) -> Result<Option<AccountTrackerState>> {
        let Some(provider) = self.provider() else {
            debug!("no provider set, skipping balance refresh");
            return Ok(None);
        };
        let previous = self.store.state();

        let mut accounts = BTreeMap::new();
        for address in self.tracked_addresses() {
            let last_known = previous
                .accounts
                .get(&address)
                .map(|info| info.balance.clone())
                .unwrap_or_else(|| ZERO_BALANCE.to_string());
            let balance = match fetch_balance(provider.as_ref(), &address).await {
                Ok(balance) => balance,
                Err(err) => {
                    warn!(%address, error = %err, "balance fetch failed, keeping last value");
                    last_known
                }
            };
            accounts.insert(address, AccountInformation { balance });
        }
        Ok(Some(AccountTrackerState { accounts }))
    }

    fn commit(&self, output: Option<AccountTrackerState>) {
        if let Some(state) = output {
            self.store.set(state);
        }
    }

    fn reset(&self) {
        self.store.reset();
    }
}

/// Tracks balances for every identity, refreshing on a timer and whenever
/// preferences change.
pub struct AccountTrackerController {
    inner: Arc<TrackerInner>,
    poller: PollingCoordinator<TrackerInner>,
}

impl AccountTrackerController {
    pub fn new(
        config: AccountTrackerConfig,
        initial_state: Option<AccountTrackerState>,
        identities: Identities,
        preferences_changes: &dyn ChangeFeed,
    ) -> Self {
        let inner = Arc::new(TrackerInner {
            store: Store::new(
                "AccountTrackerController",
                AccountTrackerState::default(),
                initial_state.unwrap_or_default(),
            ),
            identities,
            source: RwLock::new(None),
        });

        let weak: Weak<TrackerInner> = Arc::downgrade(&inner);
        let constructed_on = Handle::try_current().ok();
        preferences_changes.on_change(Box::new(move || {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match Handle::try_current().ok().or_else(|| constructed_on.clone()) {
                Some(handle) => {
                    handle.spawn(async move { inner.refresh_now().await });
                }
                None => warn!("no runtime, preferences change not followed by a refresh"),
            }
        }));

        let poller = PollingCoordinator::new(
            "AccountTrackerController",
            config.interval(),
            Arc::clone(&inner),
        );
        Self { inner, poller }
    }

    /// Sets where balances are read from. There is deliberately no getter.
    pub fn set_provider(&self, source: Arc<dyn ProviderSource>) {
        *self.inner.source.write() = Some(source);
    }

    pub fn state(&self) -> Arc<AccountTrackerState> {
        self.inner.store.state()
    }

    pub fn subscribe(
        &self,
        listener: impl Fn(&AccountTrackerState, &[Patch]) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.inner.store.subscribe(listener)
    }

    /// Syncs the account list with the identities and refreshes every
    /// balance. Does nothing until a provider is set.
    pub async fn refresh(&self) {
        self.inner.refresh_now().await;
    }

    /// Balances for `addresses`, without touching state. Empty without a
    /// provider; the first failed query is returned as the error.
    pub async fn sync_balance_with_addresses(
        &self,
        addresses: &[String],
    ) -> Result<BTreeMap<String, AccountInformation>> {
        let Some(provider) = self.inner.provider() else {
            return Ok(BTreeMap::new());
        };
        let mut balances = BTreeMap::new();
        for address in addresses {
            let balance = fetch_balance(provider.as_ref(), address).await?;
            balances.insert(address.clone(), AccountInformation { balance });
        }
        Ok(balances)
    }

    pub async fn start_polling(&self, token: Option<PollToken>) -> Result<PollToken> {
        self.poller.start_polling(token).await
    }

    pub fn stop_polling_by_token(&self, token: &PollToken) {
        self.poller.stop_polling_by_token(token);
    }

    pub fn is_polling(&self) -> bool {
        self.poller.is_polling()
    }

    pub fn destroy(&self) {
        self.poller.destroy();
        self.inner.store.destroy();
    }
}
