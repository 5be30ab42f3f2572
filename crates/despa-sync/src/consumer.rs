//! Consumer binding: a scoped subscription with bounded local state.
//!
//! A [`SyncConsumer`] registers one listener per requested event type under
//! its tenant, deduplicates what the registry fans out, and keeps the last
//! event plus a most-recent-first history capped at the configured capacity.
//! Dropping the consumer always removes its listeners and releases the
//! tenant's feed subscriptions.
//!
//! ```rust
//! use std::sync::Arc;
//! use despa_core::{EventType, MemoryFeed};
//! use despa_sync::{ConsumerOptions, SyncConsumer, SyncRegistry};
//!
//! let registry = Arc::new(SyncRegistry::new(Arc::new(MemoryFeed::new())));
//! let consumer = SyncConsumer::new(
//!     registry.clone(),
//!     ConsumerOptions::new("acme").with_event_types(vec![EventType::Process]),
//! );
//! assert!(consumer.is_connected());
//! drop(consumer);
//! assert_eq!(registry.total_listener_count(), 0);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, info, trace};

use despa_core::{DedupSet, Event, EventType, Result};

use crate::registry::{Listener, ListenerHandle, SyncRegistry};

/// Connection lifecycle of a consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Construction options for a [`SyncConsumer`].
#[derive(Clone)]
pub struct ConsumerOptions {
    pub tenant_id: String,
    /// Empty means the registry's configured default types.
    pub event_types: Vec<EventType>,
    pub auto_connect: bool,
    /// Invoked with each delivered event after local state is updated.
    pub on_event: Option<Listener>,
}

impl ConsumerOptions {
    pub fn new(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_types: Vec::new(),
            auto_connect: true,
            on_event: None,
        }
    }

    pub fn with_event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = event_types;
        self
    }

    pub fn with_auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn with_on_event<F>(mut self, on_event: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.on_event = Some(Arc::new(on_event));
        self
    }
}

struct ConsumerState {
    last_event: Option<Event>,
    history: VecDeque<Event>,
    capacity: usize,
    dedup: DedupSet,
}

impl ConsumerState {
    /// Record `event` unless it was already delivered. Returns whether it was
    /// new.
    fn accept(&mut self, event: &Event) -> bool {
        if !self.dedup.should_deliver(event) {
            trace!(event_id = %event.id, event_type = %event.event_type, "Duplicate event ignored");
            return false;
        }
        self.last_event = Some(event.clone());
        self.history.push_front(event.clone());
        self.history.truncate(self.capacity);
        true
    }

    fn clear_visible(&mut self) {
        self.last_event = None;
        self.history.clear();
    }
}

fn lock(state: &Mutex<ConsumerState>) -> MutexGuard<'_, ConsumerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scoped subscription to a tenant's event streams.
pub struct SyncConsumer {
    registry: Arc<SyncRegistry>,
    tenant_id: String,
    event_types: Vec<EventType>,
    auto_connect: bool,
    on_event: Option<Listener>,
    status: ConnectionStatus,
    handles: Vec<ListenerHandle>,
    state: Arc<Mutex<ConsumerState>>,
}

impl SyncConsumer {
    /// Build a consumer; connects immediately when `auto_connect` is set.
    pub fn new(registry: Arc<SyncRegistry>, options: ConsumerOptions) -> Self {
        let config = registry.config();
        let event_types = if options.event_types.is_empty() {
            config.default_event_types.clone()
        } else {
            options.event_types
        };
        let state = ConsumerState {
            last_event: None,
            history: VecDeque::with_capacity(config.history_capacity),
            capacity: config.history_capacity.max(1),
            dedup: DedupSet::from_limit(config.dedup_capacity),
        };

        let mut consumer = Self {
            registry,
            tenant_id: options.tenant_id,
            event_types,
            auto_connect: options.auto_connect,
            on_event: options.on_event,
            status: ConnectionStatus::Disconnected,
            handles: Vec::new(),
            state: Arc::new(Mutex::new(state)),
        };
        if consumer.auto_connect {
            consumer.connect();
        }
        consumer
    }

    fn listener(&self) -> Listener {
        let state = Arc::downgrade(&self.state);
        let hook = self.on_event.clone();
        Arc::new(move |event: &Event| {
            let Some(state) = state.upgrade() else {
                return;
            };
            let accepted = lock(&state).accept(event);
            if accepted {
                if let Some(hook) = &hook {
                    hook(event);
                }
            }
        })
    }

    /// Register listeners and connect the tenant. No-op when already
    /// connected or when the tenant id is empty.
    pub fn connect(&mut self) {
        if self.status == ConnectionStatus::Connected {
            return;
        }
        if self.tenant_id.is_empty() {
            debug!("Consumer has no tenant, staying disconnected");
            return;
        }

        self.status = ConnectionStatus::Connecting;
        let listener = self.listener();
        self.handles = self
            .event_types
            .iter()
            .map(|&event_type| {
                self.registry
                    .add_event_listener(&self.tenant_id, event_type, listener.clone())
            })
            .collect();
        self.registry
            .connect_to_tenant(&self.tenant_id, &self.event_types);
        self.status = ConnectionStatus::Connected;
        info!(tenant_id = %self.tenant_id, listener_count = self.handles.len(), "Consumer connected");
    }

    /// Remove this consumer's listeners, release the tenant, and clear the
    /// visible state. No-op when not connected.
    pub fn disconnect(&mut self) {
        if self.status != ConnectionStatus::Connected {
            return;
        }
        for handle in self.handles.drain(..) {
            self.registry.remove_event_listener(&handle);
        }
        self.registry.disconnect_from_tenant(&self.tenant_id);
        lock(&self.state).clear_visible();
        self.status = ConnectionStatus::Disconnected;
        info!(tenant_id = %self.tenant_id, "Consumer disconnected");
    }

    /// Rebind to another tenant. The old tenant is fully released before the
    /// new one is connected, and the dedup set starts over.
    pub fn set_tenant(&mut self, tenant_id: impl Into<String>) {
        let tenant_id = tenant_id.into();
        if tenant_id == self.tenant_id {
            return;
        }
        self.disconnect();
        debug!(from = %self.tenant_id, to = %tenant_id, "Consumer switching tenant");
        self.tenant_id = tenant_id;
        lock(&self.state).dedup.clear();
        if self.auto_connect {
            self.connect();
        }
    }

    /// Register an extra listener on the registry under this consumer's
    /// tenant. It bypasses the dedup set and is not removed by
    /// [`Self::disconnect`].
    pub fn add_event_listener(&self, event_type: EventType, listener: Listener) -> ListenerHandle {
        self.registry
            .add_event_listener(&self.tenant_id, event_type, listener)
    }

    pub fn remove_event_listener(&self, handle: &ListenerHandle) -> bool {
        self.registry.remove_event_listener(handle)
    }

    /// Read every requested type once and deliver the events with
    /// `timestamp >= since_millis` through the same dedup and history path as
    /// live events. Returns how many were newly delivered.
    pub async fn catch_up(&self, since_millis: i64) -> Result<usize> {
        let mut delivered = 0;
        for &event_type in &self.event_types {
            let events = self
                .registry
                .backfill(&self.tenant_id, event_type, since_millis)
                .await?;
            for event in events {
                let accepted = lock(&self.state).accept(&event);
                if accepted {
                    delivered += 1;
                    if let Some(hook) = &self.on_event {
                        hook(&event);
                    }
                }
            }
        }
        debug!(tenant_id = %self.tenant_id, delivered, "Catch-up complete");
        Ok(delivered)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn event_types(&self) -> &[EventType] {
        &self.event_types
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Local lifecycle state. Another consumer disconnecting the same tenant
    /// removes this consumer's listeners without changing its status; see
    /// [`Self::registered_listener_count`].
    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn last_event(&self) -> Option<Event> {
        lock(&self.state).last_event.clone()
    }

    /// Visible history, most recent first.
    pub fn events(&self) -> Vec<Event> {
        lock(&self.state).history.iter().cloned().collect()
    }

    pub fn event_count(&self) -> usize {
        lock(&self.state).history.len()
    }

    /// Visible history broken down by event type.
    pub fn count_by_type(&self) -> HashMap<EventType, usize> {
        let mut counts = HashMap::new();
        for event in lock(&self.state).history.iter() {
            *counts.entry(event.event_type).or_insert(0) += 1;
        }
        counts
    }

    /// Listeners of this consumer still registered on the registry. Drops to
    /// zero when the tenant was torn down from elsewhere.
    pub fn registered_listener_count(&self) -> usize {
        self.handles
            .iter()
            .filter(|handle| self.registry.is_registered(handle))
            .count()
    }
}

impl Drop for SyncConsumer {
    fn drop(&mut self) {
        self.disconnect();
    }
}
