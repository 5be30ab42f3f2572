//! Server-side relay: writes published events where the adapter listens.
//!
//! The relay is the producing half of the pipeline. An event received from
//! the backend bus is written to `tenants/{tenant}/events/{type}/{event_id}`,
//! and notification events are mirrored into `tenants/{tenant}/notifications`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, instrument};

use despa_core::defaults::{
    EVENTS_SEGMENT, NOTIFICATIONS_SEGMENT, RELAY_NOTIFICATIONS_TYPE, RELAY_SOURCE, TENANTS_ROOT,
    UNKNOWN_ACTION,
};
use despa_core::{Clock, Error, FeedWriter, Result, SystemClock};

/// An event as published on the backend bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayEvent {
    pub event_id: String,
    /// Raw stream name; `notifications` is also mirrored to the
    /// notification collection.
    pub event_type: String,
    pub tenant_id: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub source: Option<String>,
}

impl RelayEvent {
    pub fn new(
        event_id: impl Into<String>,
        tenant_id: impl Into<String>,
        event_type: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            event_id: event_id.into(),
            event_type: event_type.into(),
            tenant_id: tenant_id.into(),
            data,
            metadata: None,
            timestamp: None,
            source: None,
        }
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// `data.action`, then `metadata.action`, then `unknown`.
    fn action(&self) -> String {
        self.data
            .get("action")
            .and_then(Value::as_str)
            .or_else(|| {
                self.metadata
                    .as_ref()
                    .and_then(|m| m.get("action"))
                    .and_then(Value::as_str)
            })
            .unwrap_or(UNKNOWN_ACTION)
            .to_string()
    }
}

/// Where an event was written and what was written there.
#[derive(Debug, Clone, PartialEq)]
pub struct RelayResult {
    pub path: String,
    pub payload: Value,
}

/// Severity of a pushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationKind {
    #[default]
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub title: String,
    pub message: String,
    pub kind: NotificationKind,
    pub target_user: Option<String>,
}

impl NewNotification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: NotificationKind::default(),
            target_user: None,
        }
    }

    pub fn with_kind(mut self, kind: NotificationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_target_user(mut self, user_id: impl Into<String>) -> Self {
        self.target_user = Some(user_id.into());
        self
    }
}

/// A stored notification record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    /// Written as `null` when absent.
    pub target_user: Option<String>,
    pub created_at: i64,
    pub read: bool,
    /// Feed key the record was pushed under; also the notification event id.
    #[serde(skip)]
    pub key: String,
}

/// Writes events and notifications onto the realtime feed.
pub struct EventRelay<W: FeedWriter> {
    writer: W,
    clock: Arc<dyn Clock>,
}

impl<W: FeedWriter> EventRelay<W> {
    pub fn new(writer: W) -> Self {
        Self::with_clock(writer, Arc::new(SystemClock))
    }

    pub fn with_clock(writer: W, clock: Arc<dyn Clock>) -> Self {
        Self { writer, clock }
    }

    pub fn writer(&self) -> &W {
        &self.writer
    }

    /// Write `event` to its stream path, mirroring notifications.
    #[instrument(skip(self, event), fields(tenant_id = %event.tenant_id, event_type = %event.event_type, event_id = %event.event_id))]
    pub async fn relay(&self, event: RelayEvent) -> Result<RelayResult> {
        if event.tenant_id.is_empty() {
            return Err(Error::InvalidInput(
                "tenant id is required to relay an event".to_string(),
            ));
        }
        if event.event_type.is_empty() {
            return Err(Error::InvalidInput(
                "event type is required to relay an event".to_string(),
            ));
        }

        let timestamp = event
            .timestamp
            .filter(|ts| *ts > 0)
            .unwrap_or_else(|| self.clock.now_millis());
        let source = event
            .source
            .clone()
            .unwrap_or_else(|| RELAY_SOURCE.to_string());
        let payload = json!({
            "id": event.event_id,
            "tenantId": event.tenant_id,
            "eventType": event.event_type,
            "action": event.action(),
            "data": event.data,
            "metadata": event.metadata.clone().unwrap_or_default(),
            "timestamp": timestamp,
            "source": source,
            "lastSyncedAt": self.clock.now_millis(),
        });

        let base = format!("{TENANTS_ROOT}/{}", event.tenant_id);
        let path = format!(
            "{base}/{EVENTS_SEGMENT}/{}/{}",
            event.event_type, event.event_id
        );
        self.writer.set(&path, payload.clone()).await?;
        debug!(feed_path = %path, "Event relayed");

        if event.event_type == RELAY_NOTIFICATIONS_TYPE {
            let mut record = match &event.data {
                Value::Object(fields) => fields.clone(),
                _ => Map::new(),
            };
            record.insert("id".to_string(), json!(event.event_id));
            record.insert("createdAt".to_string(), json!(timestamp));
            record.insert("source".to_string(), json!(source));
            record.insert("lastSyncedAt".to_string(), json!(self.clock.now_millis()));

            let notification_path = format!("{base}/{NOTIFICATIONS_SEGMENT}/{}", event.event_id);
            self.writer
                .set(&notification_path, Value::Object(record))
                .await?;
            debug!(feed_path = %notification_path, "Notification mirrored");
        }

        Ok(RelayResult { path, payload })
    }

    /// Push a new unread notification for the tenant.
    #[instrument(skip(self, notification), fields(tenant_id = %tenant_id))]
    pub async fn create_notification(
        &self,
        tenant_id: &str,
        notification: NewNotification,
    ) -> Result<Notification> {
        if tenant_id.is_empty() {
            return Err(Error::InvalidInput(
                "tenant id is required to create a notification".to_string(),
            ));
        }

        let mut record = Notification {
            id: uuid::Uuid::now_v7().to_string(),
            title: notification.title,
            message: notification.message,
            kind: notification.kind,
            target_user: notification.target_user,
            created_at: self.clock.now_millis(),
            read: false,
            key: String::new(),
        };

        let path = format!("{TENANTS_ROOT}/{tenant_id}/{NOTIFICATIONS_SEGMENT}");
        record.key = self
            .writer
            .push(&path, serde_json::to_value(&record)?)
            .await?;
        info!(feed_path = %path, event_id = %record.key, "Notification created");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use despa_core::{ManualClock, MemoryFeed};

    const NOW: i64 = 1_700_000_000_000;

    fn relay() -> (MemoryFeed, EventRelay<MemoryFeed>) {
        let feed = MemoryFeed::new();
        let relay = EventRelay::with_clock(feed.clone(), Arc::new(ManualClock::new(NOW)));
        (feed, relay)
    }

    #[tokio::test]
    async fn test_relay_writes_stream_record() {
        let (feed, relay) = relay();
        let result = relay
            .relay(
                RelayEvent::new("e1", "acme", "process", json!({"id": "p1", "action": "created"}))
                    .with_timestamp(NOW - 50),
            )
            .await
            .unwrap();

        assert_eq!(result.path, "tenants/acme/events/process/e1");
        let stored = feed.get(&result.path).unwrap();
        assert_eq!(stored, result.payload);
        assert_eq!(stored["id"], "e1");
        assert_eq!(stored["tenantId"], "acme");
        assert_eq!(stored["eventType"], "process");
        assert_eq!(stored["action"], "created");
        assert_eq!(stored["metadata"], json!({}));
        assert_eq!(stored["timestamp"], NOW - 50);
        assert_eq!(stored["source"], "web");
        assert_eq!(stored["lastSyncedAt"], NOW);
    }

    #[tokio::test]
    async fn test_relay_action_falls_back_to_metadata_then_unknown() {
        let (_feed, relay) = relay();
        let mut metadata = Map::new();
        metadata.insert("action".to_string(), json!("updated"));

        let from_metadata = relay
            .relay(RelayEvent::new("e1", "acme", "client", json!({})).with_metadata(metadata))
            .await
            .unwrap();
        assert_eq!(from_metadata.payload["action"], "updated");

        let unknown = relay
            .relay(RelayEvent::new("e2", "acme", "client", Value::Null).with_source("mobile"))
            .await
            .unwrap();
        assert_eq!(unknown.payload["action"], "unknown");
        assert_eq!(unknown.payload["source"], "mobile");
        assert_eq!(unknown.payload["timestamp"], NOW);
    }

    #[tokio::test]
    async fn test_relay_mirrors_notifications() {
        let (feed, relay) = relay();
        relay
            .relay(
                RelayEvent::new("n1", "acme", "notifications", json!({"title": "CRLV emitido"}))
                    .with_timestamp(NOW - 10),
            )
            .await
            .unwrap();

        let mirrored = feed.get("tenants/acme/notifications/n1").unwrap();
        assert_eq!(mirrored["title"], "CRLV emitido");
        assert_eq!(mirrored["id"], "n1");
        assert_eq!(mirrored["createdAt"], NOW - 10);
        assert_eq!(mirrored["source"], "web");
        assert!(feed.get("tenants/acme/events/notifications/n1").is_some());
    }

    #[tokio::test]
    async fn test_relay_requires_tenant_and_type() {
        let (feed, relay) = relay();
        let missing_tenant = relay.relay(RelayEvent::new("e1", "", "process", json!({}))).await;
        assert!(matches!(missing_tenant, Err(Error::InvalidInput(_))));

        let missing_type = relay.relay(RelayEvent::new("e1", "acme", "", json!({}))).await;
        assert!(matches!(missing_type, Err(Error::InvalidInput(_))));

        assert!(feed.get("tenants").is_none());
    }

    #[tokio::test]
    async fn test_create_notification() {
        let (feed, relay) = relay();
        let created = relay
            .create_notification(
                "acme",
                NewNotification::new("Vistoria agendada", "Amanhã às 9h")
                    .with_kind(NotificationKind::Success)
                    .with_target_user("u1"),
            )
            .await
            .unwrap();

        assert!(!created.read);
        assert_eq!(created.created_at, NOW);
        let stored = feed
            .get(&format!("tenants/acme/notifications/{}", created.key))
            .unwrap();
        assert_eq!(stored["id"], created.id.as_str());
        assert_eq!(stored["type"], "SUCCESS");
        assert_eq!(stored["targetUser"], "u1");
        assert_eq!(stored["read"], false);
    }

    #[tokio::test]
    async fn test_create_notification_without_target_writes_null() {
        let (feed, relay) = relay();
        let created = relay
            .create_notification("acme", NewNotification::new("Aviso", "Sistema em manutenção"))
            .await
            .unwrap();
        let stored = feed
            .get(&format!("tenants/acme/notifications/{}", created.key))
            .unwrap();
        assert_eq!(stored["targetUser"], Value::Null);
        assert_eq!(stored["type"], "INFO");
    }

    #[tokio::test]
    async fn test_relay_event_deserializes_bus_payload() {
        let event: RelayEvent = serde_json::from_value(json!({
            "eventId": "e1",
            "eventType": "process",
            "tenantId": "acme",
            "data": {"id": "p1"}
        }))
        .unwrap();
        assert_eq!(event.event_id, "e1");
        assert!(event.metadata.is_none());
        assert!(event.timestamp.is_none());
    }
}
