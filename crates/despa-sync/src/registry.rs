//! Sync registry and dispatcher.
//!
//! One [`SyncRegistry`] per process owns, for every `(tenant, event type)`
//! key, the shared feed subscription and the list of listeners interested in
//! that key. Each fresh event produced by the key's adapter is fanned out to
//! every listener registered at dispatch time.
//!
//! Lifecycle operations never fail from the caller's point of view: feed
//! refusals are logged and contained, and redundant calls are no-ops.
//!
//! ## Locking
//!
//! Registry state sits behind a `Mutex` that is never held while calling into
//! the feed or into a listener. The feed may invoke its callback from inside
//! `subscribe`, and listeners may add or remove listeners while being
//! dispatched to.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, error, info, instrument, trace, warn};

use despa_core::defaults::TENANTS_ROOT;
use despa_core::{
    Clock, Error, Event, EventType, FeedSubscription, RealtimeFeed, Result, Snapshot,
    SnapshotCallback, SubscriptionKey, SystemClock,
};

use crate::adapter::{events_since, EventSourceAdapter};
use crate::config::SyncConfig;

/// Callback receiving each fresh event of a key.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Registry-unique listener identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// Returned by [`SyncRegistry::subscribe`]; pass it back to
/// [`SyncRegistry::unsubscribe`] to remove the listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    key: SubscriptionKey,
    id: ListenerId,
}

impl ListenerHandle {
    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }
}

struct RegisteredListener {
    id: ListenerId,
    listener: Listener,
}

#[derive(Default)]
struct RegistryState {
    listeners: HashMap<SubscriptionKey, Vec<RegisteredListener>>,
    feeds: HashMap<SubscriptionKey, Box<dyn FeedSubscription>>,
    /// Keys whose feed subscription is being opened outside the lock.
    opening: HashSet<SubscriptionKey>,
}

fn lock(state: &Mutex<RegistryState>) -> MutexGuard<'_, RegistryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "listener panicked".to_string()
    }
}

/// Deliver events to the listeners of `key`, one event at a time.
///
/// The listener list is copied before each event so a listener may mutate
/// the registry while being called.
fn dispatch(state: &Mutex<RegistryState>, key: &SubscriptionKey, events: &[Event]) {
    for event in events {
        let listeners: Vec<(ListenerId, Listener)> = lock(state)
            .listeners
            .get(key)
            .map(|list| {
                list.iter()
                    .map(|r| (r.id, r.listener.clone()))
                    .collect()
            })
            .unwrap_or_default();

        trace!(
            subscription_key = %key,
            event_id = %event.id,
            listener_count = listeners.len(),
            "Dispatching event"
        );

        for (id, listener) in listeners {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                error!(
                    subscription_key = %key,
                    event_id = %event.id,
                    listener = %id,
                    error = %panic_message(payload.as_ref()),
                    "Listener panicked, continuing fan-out"
                );
            }
        }
    }
}

/// Per-process registry of feed subscriptions and listeners.
pub struct SyncRegistry {
    feed: Arc<dyn RealtimeFeed>,
    clock: Arc<dyn Clock>,
    config: SyncConfig,
    state: Arc<Mutex<RegistryState>>,
    next_listener_id: AtomicU64,
}

impl SyncRegistry {
    /// Registry over `feed` with default configuration and the system clock.
    pub fn new(feed: Arc<dyn RealtimeFeed>) -> Self {
        Self::with_config(feed, SyncConfig::default())
    }

    pub fn with_config(feed: Arc<dyn RealtimeFeed>, config: SyncConfig) -> Self {
        Self::with_clock(feed, config, Arc::new(SystemClock))
    }

    pub fn with_clock(feed: Arc<dyn RealtimeFeed>, config: SyncConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            feed,
            clock,
            config,
            state: Arc::new(Mutex::new(RegistryState::default())),
            next_listener_id: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    fn resolve_types<'a>(&'a self, event_types: &'a [EventType]) -> &'a [EventType] {
        if event_types.is_empty() {
            &self.config.default_event_types
        } else {
            event_types
        }
    }

    /// Open (or reuse) the feed subscription of every requested type under
    /// `tenant_id`. An empty list means the configured default types.
    #[instrument(skip(self), fields(subsystem = "registry"))]
    pub fn connect_to_tenant(&self, tenant_id: &str, event_types: &[EventType]) {
        if tenant_id.is_empty() {
            warn!("Ignoring connect for empty tenant id");
            return;
        }
        info!(tenant_id, "Connecting to tenant");
        for &event_type in self.resolve_types(event_types) {
            self.open_key(SubscriptionKey::new(tenant_id, event_type));
        }
    }

    fn open_key(&self, key: SubscriptionKey) {
        {
            let mut state = lock(&self.state);
            if state.feeds.contains_key(&key) || state.opening.contains(&key) {
                debug!(subscription_key = %key, "Feed subscription already open, reusing");
                return;
            }
            state.opening.insert(key.clone());
        }

        let path = key.feed_path();
        let adapter = EventSourceAdapter::new(
            key.clone(),
            self.clock.clone(),
            self.config.freshness_window_ms,
        );
        let weak = Arc::downgrade(&self.state);
        let callback: SnapshotCallback = Arc::new(move |result: Result<Snapshot>| {
            let events = adapter.handle(result);
            if events.is_empty() {
                return;
            }
            if let Some(state) = weak.upgrade() {
                dispatch(&state, adapter.key(), &events);
            }
        });

        let opened = self.feed.subscribe(&path, callback);

        let stale = {
            let mut state = lock(&self.state);
            // Gone from `opening` means the tenant was disconnected while the
            // subscription was being opened.
            let still_wanted = state.opening.remove(&key);
            match opened {
                Ok(subscription) if still_wanted => {
                    state.feeds.insert(key.clone(), subscription);
                    debug!(subscription_key = %key, feed_path = %path, "Feed subscription opened");
                    None
                }
                Ok(subscription) => Some(subscription),
                Err(e) => {
                    warn!(subscription_key = %key, feed_path = %path, error = %e, "Feed refused subscription");
                    None
                }
            }
        };
        if let Some(subscription) = stale {
            debug!(subscription_key = %key, "Tenant disconnected during open, releasing");
            subscription.unsubscribe();
        }
    }

    /// Release every feed subscription and listener of `tenant_id`.
    #[instrument(skip(self), fields(subsystem = "registry"))]
    pub fn disconnect_from_tenant(&self, tenant_id: &str) {
        let (subscriptions, listener_count) = {
            let mut state = lock(&self.state);
            let keys: Vec<SubscriptionKey> = state
                .feeds
                .keys()
                .filter(|k| k.belongs_to(tenant_id))
                .cloned()
                .collect();
            let subscriptions: Vec<_> = keys
                .iter()
                .filter_map(|k| state.feeds.remove(k))
                .collect();

            let mut listener_count = 0;
            state.listeners.retain(|k, list| {
                if k.belongs_to(tenant_id) {
                    listener_count += list.len();
                    false
                } else {
                    true
                }
            });
            state.opening.retain(|k| !k.belongs_to(tenant_id));
            (subscriptions, listener_count)
        };

        if subscriptions.is_empty() && listener_count == 0 {
            debug!(tenant_id, "Nothing open for tenant");
            return;
        }

        let feed_count = subscriptions.len();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        info!(tenant_id, feed_count, listener_count, "Disconnected from tenant");
    }

    /// Register `listener` for `(tenant_id, event_type)`.
    pub fn add_event_listener(
        &self,
        tenant_id: &str,
        event_type: EventType,
        listener: Listener,
    ) -> ListenerHandle {
        self.subscribe(SubscriptionKey::new(tenant_id, event_type), listener)
    }

    /// Remove a listener registered with [`Self::add_event_listener`].
    /// Returns whether it was still registered.
    pub fn remove_event_listener(&self, handle: &ListenerHandle) -> bool {
        self.unsubscribe(handle)
    }

    /// Append `listener` to the list of `key`.
    pub fn subscribe(&self, key: SubscriptionKey, listener: Listener) -> ListenerHandle {
        let id = ListenerId(self.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let listener_count = {
            let mut state = lock(&self.state);
            let list = state.listeners.entry(key.clone()).or_default();
            list.push(RegisteredListener { id, listener });
            list.len()
        };
        debug!(subscription_key = %key, listener = %id, listener_count, "Listener added");
        ListenerHandle { key, id }
    }

    /// Remove the listener behind `handle`. No-op when already removed.
    pub fn unsubscribe(&self, handle: &ListenerHandle) -> bool {
        let mut state = lock(&self.state);
        let Some(list) = state.listeners.get_mut(&handle.key) else {
            return false;
        };
        let Some(index) = list.iter().position(|r| r.id == handle.id) else {
            return false;
        };
        list.remove(index);
        let remaining = list.len();
        if remaining == 0 {
            state.listeners.remove(&handle.key);
        }
        drop(state);
        debug!(subscription_key = %handle.key, listener = %handle.id, listener_count = remaining, "Listener removed");
        true
    }

    /// Tear down every subscription and clear all listeners.
    pub fn disconnect(&self) {
        let subscriptions: Vec<Box<dyn FeedSubscription>> = {
            let mut state = lock(&self.state);
            state.listeners.clear();
            state.opening.clear();
            state.feeds.drain().map(|(_, sub)| sub).collect()
        };
        let feed_count = subscriptions.len();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        if feed_count > 0 {
            info!(feed_count, "Disconnected all feed subscriptions");
        }
    }

    /// One-shot read of `tenants/{tenant_id}/{path}`.
    pub async fn get_data(&self, tenant_id: &str, path: &str) -> Result<Option<Value>> {
        if tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant id is required".to_string()));
        }
        let full_path = format!("{TENANTS_ROOT}/{tenant_id}/{}", path.trim_start_matches('/'));
        self.feed.read_once(&full_path).await
    }

    /// Read the key's stream once and return every event with
    /// `timestamp >= since_millis`, oldest first.
    pub async fn backfill(
        &self,
        tenant_id: &str,
        event_type: EventType,
        since_millis: i64,
    ) -> Result<Vec<Event>> {
        if tenant_id.is_empty() {
            return Err(Error::InvalidInput("tenant id is required".to_string()));
        }
        let key = SubscriptionKey::new(tenant_id, event_type);
        let path = key.feed_path();
        let value = self.feed.read_once(&path).await?;
        let events = events_since(
            &key,
            &Snapshot::new(path, value),
            self.clock.now_millis(),
            since_millis,
        );
        debug!(subscription_key = %key, event_count = events.len(), "Backfill read");
        Ok(events)
    }

    pub fn listener_count(&self, key: &SubscriptionKey) -> usize {
        lock(&self.state).listeners.get(key).map_or(0, Vec::len)
    }

    /// Whether the listener behind `handle` is still registered.
    pub fn is_registered(&self, handle: &ListenerHandle) -> bool {
        lock(&self.state)
            .listeners
            .get(&handle.key)
            .is_some_and(|list| list.iter().any(|r| r.id == handle.id))
    }

    pub fn total_listener_count(&self) -> usize {
        lock(&self.state).listeners.values().map(Vec::len).sum()
    }

    pub fn is_key_open(&self, key: &SubscriptionKey) -> bool {
        lock(&self.state).feeds.contains_key(key)
    }

    /// Keys with an open feed subscription, sorted.
    pub fn open_keys(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = lock(&self.state).feeds.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Drop for SyncRegistry {
    fn drop(&mut self) {
        self.disconnect();
    }
}
