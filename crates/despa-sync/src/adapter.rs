//! Event source adapter: feed snapshots in, discrete fresh events out.
//!
//! A subscription on `tenants/{tenant}/events/{type}` delivers a map of
//! event-id → record shaped like an [`Event`] minus its id. A subscription on
//! `tenants/{tenant}/notifications` delivers a map of notification-id →
//! notification record, which is turned into a `created` notification event.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, trace, warn};

use despa_core::defaults::UNKNOWN_ACTION;
use despa_core::{filter_recent, Clock, Event, EventType, Result, Snapshot, SubscriptionKey};

/// Read an epoch-millis field that may have been stored as an integer or a
/// float.
fn millis(value: Option<&Value>) -> Option<i64> {
    let value = value?;
    value
        .as_i64()
        .or_else(|| value.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
}

fn string_field(record: &Map<String, Value>, field: &str) -> Option<String> {
    record
        .get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Creation time of a notification record. Absent or `null` falls back to
/// `received_at`; any other non-numeric value is invalid and maps to `0`.
fn created_at(record: &Map<String, Value>, received_at: i64) -> i64 {
    match record.get("createdAt") {
        None | Some(Value::Null) => received_at,
        value => millis(value).unwrap_or(0),
    }
}

fn notification_event(
    key: &SubscriptionKey,
    id: &str,
    record: &Value,
    received_at: i64,
) -> Option<Event> {
    let Some(fields) = record.as_object() else {
        warn!(
            subscription_key = %key,
            event_id = id,
            "Skipping notification record that is not an object"
        );
        return None;
    };

    Some(Event {
        id: id.to_string(),
        tenant_id: key.tenant_id.clone(),
        event_type: EventType::Notification,
        action: "created".to_string(),
        data: record.clone(),
        timestamp: created_at(fields, received_at),
        user_id: string_field(fields, "targetUser"),
    })
}

fn stream_event(key: &SubscriptionKey, id: &str, record: &Value) -> Option<Event> {
    let Some(fields) = record.as_object() else {
        warn!(
            subscription_key = %key,
            event_id = id,
            "Skipping event record that is not an object"
        );
        return None;
    };

    if let Some(tenant) = string_field(fields, "tenantId").filter(|t| *t != key.tenant_id) {
        debug!(subscription_key = %key, event_id = id, record_tenant = %tenant, "Record tenant differs from path, using path");
    }

    Some(Event {
        id: id.to_string(),
        tenant_id: key.tenant_id.clone(),
        event_type: key.event_type,
        action: string_field(fields, "action").unwrap_or_else(|| UNKNOWN_ACTION.to_string()),
        data: fields.get("data").cloned().unwrap_or(Value::Null),
        timestamp: millis(fields.get("timestamp")).unwrap_or(0),
        user_id: string_field(fields, "userId"),
    })
}

/// Convert every record of a snapshot into an [`Event`], without any recency
/// filtering. `received_at` backs notifications that carry no creation time.
pub fn events_from_snapshot(
    key: &SubscriptionKey,
    snapshot: &Snapshot,
    received_at: i64,
) -> Vec<Event> {
    let Some(value) = snapshot.value() else {
        return Vec::new();
    };
    let Some(records) = value.as_object() else {
        warn!(
            subscription_key = %key,
            feed_path = snapshot.path(),
            "Snapshot is not a map of records, ignoring"
        );
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|(id, record)| match key.event_type {
            EventType::Notification => notification_event(key, id, record, received_at),
            _ => stream_event(key, id, record),
        })
        .collect()
}

fn sort_chronologically(events: &mut [Event]) {
    events.sort_by(|a, b| (a.timestamp, &a.id).cmp(&(b.timestamp, &b.id)));
}

/// Fresh events of a snapshot, oldest first.
pub fn fresh_events(
    key: &SubscriptionKey,
    snapshot: &Snapshot,
    now: i64,
    window_ms: i64,
) -> Vec<Event> {
    let mut events = filter_recent(events_from_snapshot(key, snapshot, now), now, window_ms);
    sort_chronologically(&mut events);
    events
}

/// Events of a snapshot with `timestamp >= since`, oldest first. Used for
/// backfill, which replaces the freshness window with an explicit bound.
pub fn events_since(key: &SubscriptionKey, snapshot: &Snapshot, now: i64, since: i64) -> Vec<Event> {
    let mut events: Vec<Event> = events_from_snapshot(key, snapshot, now)
        .into_iter()
        .filter(|event| event.timestamp > 0 && event.timestamp >= since)
        .collect();
    sort_chronologically(&mut events);
    events
}

/// Per-key adapter invoked from the feed callback.
pub struct EventSourceAdapter {
    key: SubscriptionKey,
    clock: Arc<dyn Clock>,
    window_ms: i64,
}

impl EventSourceAdapter {
    pub fn new(key: SubscriptionKey, clock: Arc<dyn Clock>, window_ms: i64) -> Self {
        Self {
            key,
            clock,
            window_ms,
        }
    }

    pub fn key(&self) -> &SubscriptionKey {
        &self.key
    }

    /// Turn one callback invocation into the fresh events to dispatch.
    ///
    /// Transport errors are logged and contribute nothing; the feed client
    /// owns reconnection.
    pub fn handle(&self, result: Result<Snapshot>) -> Vec<Event> {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    subscription_key = %self.key,
                    error = %e,
                    "Feed delivered an error, awaiting next snapshot"
                );
                return Vec::new();
            }
        };

        let events = fresh_events(&self.key, &snapshot, self.clock.now_millis(), self.window_ms);
        trace!(
            subscription_key = %self.key,
            exists = snapshot.exists(),
            event_count = events.len(),
            "Snapshot adapted"
        );
        events
    }
}
