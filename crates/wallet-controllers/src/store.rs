//! Observable controller state.
//!
//! A [`Store`] holds one immutable snapshot at a time. Updates build a whole
//! new snapshot and swap it in, then notify listeners with the snapshot and a
//! list of top-level [`Patch`]es for persistence layers.
//!
//! Publishing is serialized: listeners and [`Store::changes`] receivers see
//! snapshots in the order they were swapped in.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Replace,
    Remove,
}

/// One changed top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub op: PatchOp,
    pub path: Vec<String>,
    pub value: Value,
}

pub type Listener<S> = Arc<dyn Fn(&S, &[Patch]) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

pub struct Store<S> {
    name: &'static str,
    default: S,
    state: RwLock<Arc<S>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener<S>)>>,
    next_id: AtomicU64,
    watch: watch::Sender<Arc<S>>,
    dispatch: ReentrantMutex<()>,
    destroyed: AtomicBool,
}

impl<S> Store<S>
where
    S: Clone + Serialize + Send + Sync + 'static,
{
    /// `default` is what [`reset`](Self::reset) restores.
    pub fn new(name: &'static str, default: S, initial: S) -> Self {
        let initial = Arc::new(initial);
        let (watch, _) = watch::channel(Arc::clone(&initial));
        Self {
            name,
            default,
            state: RwLock::new(initial),
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            watch,
            dispatch: ReentrantMutex::new(()),
            destroyed: AtomicBool::new(false),
        }
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<S> {
        Arc::clone(&self.state.read())
    }

    /// Replaces the state with whatever `f` builds from the current snapshot.
    ///
    /// Returns `false` when nothing was published: the store is destroyed or
    /// the new snapshot has no top-level difference.
    pub fn update(&self, f: impl FnOnce(&S) -> S) -> bool {
        if self.is_destroyed() {
            debug!(store = self.name, "ignoring update on destroyed store");
            return false;
        }

        // Held until every listener has run. Reentrant so a listener may
        // publish to the same store from its own thread.
        let _dispatch = self.dispatch.lock();
        let (next, patches) = {
            let mut guard = self.state.write();
            let next = Arc::new(f(&guard));
            let patches = diff(self.name, &**guard, &*next);
            if patches.is_empty() {
                return false;
            }
            *guard = Arc::clone(&next);
            self.watch.send_replace(Arc::clone(&next));
            (next, patches)
        };

        self.notify(&next, &patches);
        true
    }

    /// Notifies listeners of the current snapshot with an empty patch list,
    /// even though nothing in it changed.
    ///
    /// For collaborators whose own state moved underneath an unchanged
    /// snapshot, such as a provider swap that leaves the network `loading`.
    pub fn announce(&self) -> bool {
        if self.is_destroyed() {
            return false;
        }
        let _dispatch = self.dispatch.lock();
        let current = self.state();
        self.watch.send_modify(|_| {});
        debug!(store = self.name, "announcing unchanged snapshot");
        self.notify(&current, &[]);
        true
    }

    fn notify(&self, state: &S, patches: &[Patch]) {
        let listeners: Vec<Listener<S>> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(state, patches);
        }
    }

    pub fn set(&self, next: S) -> bool {
        self.update(move |_| next)
    }

    /// Restores the default snapshot.
    pub fn reset(&self) -> bool {
        let default = self.default.clone();
        self.set(default)
    }

    pub fn subscribe(&self, listener: impl Fn(&S, &[Patch]) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Receiver that always holds the latest snapshot.
    pub fn changes(&self) -> watch::Receiver<Arc<S>> {
        self.watch.subscribe()
    }

    /// Drops all listeners; later updates are ignored. Safe to repeat.
    pub fn destroy(&self) {
        self.destroyed.store(true, Ordering::SeqCst);
        self.listeners.write().clear();
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }
}

/// An upstream source of "something changed" notifications.
///
/// Derived controllers take one of these at construction instead of a
/// concrete store, so they can follow any collaborator's state.
pub trait ChangeFeed: Send + Sync {
    fn on_change(&self, callback: Box<dyn Fn() + Send + Sync>);
}

impl<S> ChangeFeed for Store<S>
where
    S: Clone + Serialize + Send + Sync + 'static,
{
    fn on_change(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.subscribe(move |_: &S, _: &[Patch]| callback());
    }
}

fn diff<S: Serialize>(name: &str, old: &S, new: &S) -> Vec<Patch> {
    let (old, new) = match (serde_json::to_value(old), serde_json::to_value(new)) {
        (Ok(old), Ok(new)) => (old, new),
        (Err(e), _) | (_, Err(e)) => {
            warn!(store = name, error = %e, "state is not serializable, publishing as root replace");
            return vec![Patch {
                op: PatchOp::Replace,
                path: Vec::new(),
                value: Value::Null,
            }];
        }
    };

    match (old, new) {
        (Value::Object(old), Value::Object(new)) => {
            let mut patches: Vec<Patch> = new
                .iter()
                .filter(|(key, value)| old.get(*key) != Some(*value))
                .map(|(key, value)| Patch {
                    op: PatchOp::Replace,
                    path: vec![key.clone()],
                    value: value.clone(),
                })
                .collect();
            patches.extend(
                old.keys()
                    .filter(|key| !new.contains_key(*key))
                    .map(|key| Patch {
                        op: PatchOp::Remove,
                        path: vec![key.clone()],
                        value: Value::Null,
                    }),
            );
            patches
        }
        (old, new) if old == new => Vec::new(),
        (_, new) => vec![Patch {
            op: PatchOp::Replace,
            path: Vec::new(),
            value: new,
        }],
    }
}
