//! Process binding: applies `process` events to a local process store.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tracing::{debug, trace};

use despa_core::{Event, EventType};

use crate::consumer::{ConsumerOptions, SyncConsumer};
use crate::registry::SyncRegistry;

/// A process as carried in an event's `data` object.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessRecord {
    pub id: String,
    pub data: Value,
}

impl ProcessRecord {
    /// Build a record from an event payload. Requires an object with a
    /// non-empty string `id`.
    pub fn from_data(data: &Value) -> Option<Self> {
        let id = data.get("id")?.as_str().filter(|id| !id.is_empty())?;
        Some(Self {
            id: id.to_string(),
            data: data.clone(),
        })
    }
}

/// Store mutation derived from one process event.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessChange {
    Created(ProcessRecord),
    Updated(ProcessRecord),
    Deleted(String),
}

impl ProcessChange {
    /// Classify an event. Returns `None` for other event types, unknown
    /// actions, and payloads without an id.
    pub fn from_event(event: &Event) -> Option<Self> {
        if event.event_type != EventType::Process {
            return None;
        }
        let record = ProcessRecord::from_data(&event.data)?;
        match event.action.as_str() {
            "created" => Some(Self::Created(record)),
            "updated" => Some(Self::Updated(record)),
            "deleted" => Some(Self::Deleted(record.id)),
            _ => None,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Created(record) | Self::Updated(record) => &record.id,
            Self::Deleted(id) => id,
        }
    }
}

/// Destination of process changes.
pub trait ProcessStore: Send + Sync {
    fn add(&self, record: ProcessRecord);
    fn update(&self, record: ProcessRecord);
    fn remove(&self, id: &str);
}

/// Process list kept most recent first.
///
/// `add` replaces any entry with the same id and puts the record at the
/// front; `update` replaces in place and ignores unknown ids.
#[derive(Debug, Default)]
pub struct InMemoryProcessStore {
    records: Mutex<Vec<ProcessRecord>>,
}

impl InMemoryProcessStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ProcessRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn list(&self) -> Vec<ProcessRecord> {
        self.lock().clone()
    }

    pub fn get(&self, id: &str) -> Option<ProcessRecord> {
        self.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl ProcessStore for InMemoryProcessStore {
    fn add(&self, record: ProcessRecord) {
        let mut records = self.lock();
        records.retain(|r| r.id != record.id);
        records.insert(0, record);
    }

    fn update(&self, record: ProcessRecord) {
        if let Some(existing) = self.lock().iter_mut().find(|r| r.id == record.id) {
            *existing = record;
        }
    }

    fn remove(&self, id: &str) {
        self.lock().retain(|r| r.id != id);
    }
}

fn apply(store: &dyn ProcessStore, event: &Event) {
    let Some(change) = ProcessChange::from_event(event) else {
        debug!(event_id = %event.id, action = %event.action, "Process event not applicable, ignoring");
        return;
    };
    trace!(event_id = %event.id, process_id = change.id(), "Applying process change");
    match change {
        ProcessChange::Created(record) => store.add(record),
        ProcessChange::Updated(record) => store.update(record),
        ProcessChange::Deleted(id) => store.remove(&id),
    }
}

/// Keeps a [`ProcessStore`] in step with a tenant's `process` stream.
pub struct ProcessSync {
    consumer: SyncConsumer,
}

impl ProcessSync {
    /// Bind `store` to the tenant's process events. Without a tenant the
    /// binding stays disconnected until [`Self::set_tenant`].
    pub fn new(
        registry: Arc<SyncRegistry>,
        tenant_id: Option<&str>,
        store: Arc<dyn ProcessStore>,
    ) -> Self {
        let options = ConsumerOptions::new(tenant_id.unwrap_or_default())
            .with_event_types(vec![EventType::Process])
            .with_auto_connect(tenant_id.is_some_and(|t| !t.is_empty()))
            .with_on_event(move |event| apply(store.as_ref(), event));
        Self {
            consumer: SyncConsumer::new(registry, options),
        }
    }

    /// Rebind to `tenant_id` and connect.
    pub fn set_tenant(&mut self, tenant_id: &str) {
        self.consumer.set_tenant(tenant_id);
        self.consumer.connect();
    }

    pub fn disconnect(&mut self) {
        self.consumer.disconnect();
    }

    pub fn is_connected(&self) -> bool {
        self.consumer.is_connected()
    }

    pub fn last_event(&self) -> Option<Event> {
        self.consumer.last_event()
    }

    pub fn consumer(&self) -> &SyncConsumer {
        &self.consumer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use despa_core::{ManualClock, MemoryFeed};
    use serde_json::json;

    const NOW: i64 = 1_700_000_000_000;

    fn setup() -> (MemoryFeed, Arc<SyncRegistry>, Arc<InMemoryProcessStore>) {
        let feed = MemoryFeed::new();
        let registry = SyncRegistry::with_clock(
            Arc::new(feed.clone()),
            SyncConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        );
        (feed, Arc::new(registry), Arc::new(InMemoryProcessStore::new()))
    }

    fn write(feed: &MemoryFeed, event_id: &str, action: &str, data: Value, age_ms: i64) {
        feed.write(
            &format!("tenants/acme/events/process/{event_id}"),
            json!({"action": action, "data": data, "timestamp": NOW - age_ms}),
        );
    }

    fn event(action: &str, data: Value) -> Event {
        Event::new("e1", "acme", EventType::Process, action, data, NOW)
    }

    #[test]
    fn test_classification() {
        let created = ProcessChange::from_event(&event("created", json!({"id": "p1"})));
        assert!(matches!(created, Some(ProcessChange::Created(ref r)) if r.id == "p1"));

        let updated = ProcessChange::from_event(&event("updated", json!({"id": "p1"})));
        assert!(matches!(updated, Some(ProcessChange::Updated(_))));

        let deleted = ProcessChange::from_event(&event("deleted", json!({"id": "p1"})));
        assert_eq!(deleted, Some(ProcessChange::Deleted("p1".to_string())));
    }

    #[test]
    fn test_classification_rejects_unusable_events() {
        assert!(ProcessChange::from_event(&event("archived", json!({"id": "p1"}))).is_none());
        assert!(ProcessChange::from_event(&event("created", json!({"id": ""}))).is_none());
        assert!(ProcessChange::from_event(&event("created", json!({"id": 7}))).is_none());
        assert!(ProcessChange::from_event(&event("created", Value::Null)).is_none());

        let client = Event::new("e1", "acme", EventType::Client, "created", json!({"id": "c1"}), NOW);
        assert!(ProcessChange::from_event(&client).is_none());
    }

    #[test]
    fn test_in_memory_store_semantics() {
        let store = InMemoryProcessStore::new();
        let record = |id: &str, status: &str| ProcessRecord {
            id: id.to_string(),
            data: json!({"id": id, "status": status}),
        };

        store.add(record("p1", "open"));
        store.add(record("p2", "open"));
        store.add(record("p1", "reopened"));
        let ids: Vec<_> = store.list().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["p1", "p2"]);

        store.update(record("p2", "done"));
        assert_eq!(store.get("p2").unwrap().data["status"], "done");
        store.update(record("p9", "ghost"));
        assert!(store.get("p9").is_none());

        store.remove("p1");
        store.remove("p1");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_store_follows_live_events_once_each() {
        let (feed, registry, store) = setup();
        let sync = ProcessSync::new(registry.clone(), Some("acme"), store.clone());
        assert!(sync.is_connected());

        write(&feed, "e1", "created", json!({"id": "p1", "status": "open"}), 30);
        write(&feed, "e2", "created", json!({"id": "p2", "status": "open"}), 20);
        write(&feed, "e3", "updated", json!({"id": "p1", "status": "done"}), 10);
        write(&feed, "e4", "deleted", json!({"id": "p2"}), 5);

        let records = store.list();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "p1");
        assert_eq!(records[0].data["status"], "done");
        assert_eq!(sync.last_event().unwrap().id, "e4");
    }

    #[test]
    fn test_no_tenant_stays_disconnected() {
        let (feed, registry, store) = setup();
        let mut sync = ProcessSync::new(registry.clone(), None, store.clone());
        assert!(!sync.is_connected());
        assert_eq!(registry.total_listener_count(), 0);

        sync.set_tenant("acme");
        assert!(sync.is_connected());
        write(&feed, "e1", "created", json!({"id": "p1"}), 10);
        assert_eq!(store.len(), 1);

        sync.disconnect();
        assert_eq!(registry.total_listener_count(), 0);
    }
}
