//! Reference-counted polling.
//!
//! Any number of consumers can ask for a target to be kept fresh. Each holds a
//! [`PollToken`]; one timer runs while at least one token is held, and the
//! target's state goes back to its default when the last token is released.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{ControllerError, Result};
use crate::types::PollToken;

/// Something a [`PollingCoordinator`] keeps fresh.
///
/// A refresh is split in two: `fetch` does the slow work and may fail, and
/// `commit` publishes the result. Results fetched before a stop are never
/// committed after it.
#[async_trait]
pub trait Refresh: Send + Sync + 'static {
    type Output: Send + 'static;

    async fn fetch(&self) -> Result<Self::Output>;

    fn commit(&self, output: Self::Output);

    /// Puts the target's state back to its default.
    fn reset(&self);
}

pub struct PollingCoordinator<T: Refresh> {
    name: &'static str,
    interval: Duration,
    target: Arc<T>,
    /// Serializes start/first-refresh so overlapping first callers do not
    /// both refresh.
    lifecycle: tokio::sync::Mutex<()>,
    tokens: Mutex<HashSet<PollToken>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    generation: Arc<AtomicU64>,
    destroyed: AtomicBool,
}

impl<T: Refresh> PollingCoordinator<T> {
    pub fn new(name: &'static str, interval: Duration, target: Arc<T>) -> Self {
        Self {
            name,
            interval: interval.max(Duration::from_millis(1)),
            target,
            lifecycle: tokio::sync::Mutex::new(()),
            tokens: Mutex::new(HashSet::new()),
            timer: Mutex::new(None),
            generation: Arc::new(AtomicU64::new(0)),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Registers interest and returns the token to release it with.
    ///
    /// The first token triggers one immediate refresh before the timer is
    /// armed. A failed refresh is logged; the token is still handed out.
    pub async fn start_polling(&self, token: Option<PollToken>) -> Result<PollToken> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_destroyed() {
            return Err(ControllerError::Destroyed);
        }

        let token = token.unwrap_or_else(PollToken::generate);
        if self.tokens.lock().is_empty() {
            let generation = self.generation.load(Ordering::SeqCst);
            match self.target.fetch().await {
                Ok(output) => {
                    if self.generation.load(Ordering::SeqCst) == generation {
                        self.target.commit(output);
                    }
                }
                Err(err) => warn!(poller = self.name, error = %err, "initial refresh failed"),
            }
            if self.is_destroyed() {
                return Err(ControllerError::Destroyed);
            }
        }

        self.add_poll_token(token.clone());
        Ok(token)
    }

    /// Adds a token without the immediate refresh. Arms the timer on the
    /// first token. Ignored once destroyed.
    pub fn add_poll_token(&self, token: PollToken) {
        if self.is_destroyed() {
            return;
        }
        let mut tokens = self.tokens.lock();
        let was_empty = tokens.is_empty();
        let inserted = tokens.insert(token);
        if was_empty && inserted {
            info!(poller = self.name, interval_ms = self.interval.as_millis() as u64, "polling started");
            self.poll();
        }
    }

    /// Releases one token. Releasing the last one stops polling and resets
    /// the target. Unknown tokens are ignored.
    pub fn stop_polling_by_token(&self, token: &PollToken) {
        let stopped = {
            let mut tokens = self.tokens.lock();
            if tokens.remove(token) && tokens.is_empty() {
                self.clear_timer();
                true
            } else {
                false
            }
        };
        if stopped {
            info!(poller = self.name, "last poll token released");
            self.target.reset();
        }
    }

    /// Drops every token, cancels the timer and resets the target.
    pub fn stop_polling(&self) {
        {
            let mut tokens = self.tokens.lock();
            tokens.clear();
            self.clear_timer();
        }
        self.target.reset();
        debug!(poller = self.name, "polling stopped");
    }

    /// (Re)starts the timer. The first tick fires one interval from now.
    pub fn poll(&self) {
        let mut timer = self.timer.lock();
        if let Some(stray) = timer.take() {
            stray.abort();
        }
        match Handle::try_current() {
            Ok(handle) => {
                let task = run_timer(
                    self.name,
                    self.interval,
                    Arc::clone(&self.target),
                    Arc::clone(&self.generation),
                    self.generation.load(Ordering::SeqCst),
                );
                *timer = Some(handle.spawn(task));
            }
            Err(_) => warn!(poller = self.name, "no runtime available, timer not armed"),
        }
    }

    /// Stops polling for good. Safe to call more than once.
    pub fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop_polling();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Whether a timer is currently armed.
    pub fn is_polling(&self) -> bool {
        self.timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn token_count(&self) -> usize {
        self.tokens.lock().len()
    }

    pub fn contains(&self, token: &PollToken) -> bool {
        self.tokens.lock().contains(token)
    }

    fn clear_timer(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(handle) = self.timer.lock().take() {
            handle.abort();
        }
    }
}

impl<T: Refresh> Drop for PollingCoordinator<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.timer.get_mut().take() {
            handle.abort();
        }
    }
}

async fn run_timer<T: Refresh>(
    name: &'static str,
    period: Duration,
    target: Arc<T>,
    generation: Arc<AtomicU64>,
    armed_at: u64,
) {
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let fetching = Arc::clone(&target);
        let result = tokio::spawn(async move { fetching.fetch().await }).await;
        if generation.load(Ordering::SeqCst) != armed_at {
            debug!(poller = name, "dropping tick result after stop");
            return;
        }
        match result {
            Ok(Ok(output)) => {
                target.commit(output);
                debug!(poller = name, "poll tick refreshed");
            }
            Ok(Err(err)) => warn!(poller = name, error = %err, "poll tick failed"),
            Err(join) if join.is_panic() => error!(poller = name, "poll tick panicked"),
            Err(_) => {
                debug!(poller = name, "poll tick cancelled");
                return;
            }
        }
    }
}
