//! Event data model and subscription keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::defaults::{EVENTS_SEGMENT, NOTIFICATIONS_SEGMENT, TENANTS_ROOT};
use crate::Error;

/// Coarse category of a real-time event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Process,
    Client,
    Notification,
    System,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 4] = [
        EventType::Process,
        EventType::Client,
        EventType::Notification,
        EventType::System,
    ];

    /// Types a consumer listens to when none are requested explicitly.
    pub const DEFAULTS: [EventType; 3] = [
        EventType::Process,
        EventType::Client,
        EventType::Notification,
    ];

    /// Lowercase wire name (`"process"`, `"client"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Process => "process",
            EventType::Client => "client",
            EventType::Notification => "notification",
            EventType::System => "system",
        }
    }

    /// Feed path carrying this type's stream for a tenant.
    ///
    /// Notifications live in their own collection; every other type lives
    /// under `events/{type}`.
    pub fn feed_path(&self, tenant_id: &str) -> String {
        match self {
            EventType::Notification => {
                format!("{TENANTS_ROOT}/{tenant_id}/{NOTIFICATIONS_SEGMENT}")
            }
            other => format!(
                "{TENANTS_ROOT}/{tenant_id}/{EVENTS_SEGMENT}/{}",
                other.as_str()
            ),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "process" => Ok(Self::Process),
            "client" => Ok(Self::Client),
            // The relay side names the collection in the plural.
            "notification" | "notifications" => Ok(Self::Notification),
            "system" => Ok(Self::System),
            other => Err(Error::InvalidInput(format!("unknown event type: {other}"))),
        }
    }
}

/// Composite `(tenant, event type)` key identifying one shared feed
/// subscription and its listener list.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    pub tenant_id: String,
    pub event_type: EventType,
}

impl SubscriptionKey {
    pub fn new(tenant_id: impl Into<String>, event_type: EventType) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            event_type,
        }
    }

    /// Feed path this key subscribes to.
    pub fn feed_path(&self) -> String {
        self.event_type.feed_path(&self.tenant_id)
    }

    pub fn belongs_to(&self, tenant_id: &str) -> bool {
        self.tenant_id == tenant_id
    }
}

/// Display form is `tenant:type`, used for logs only.
impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.event_type)
    }
}

/// The unit of synchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Unique within a `(tenant, type)` stream; the dedup key.
    pub id: String,
    pub tenant_id: String,
    #[serde(rename = "type", alias = "eventType")]
    pub event_type: EventType,
    /// `created`, `updated`, `deleted`, or another domain action.
    pub action: String,
    /// Opaque payload whose shape depends on `event_type`.
    #[serde(default)]
    pub data: Value,
    /// Epoch milliseconds.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

impl Event {
    pub fn new(
        id: impl Into<String>,
        tenant_id: impl Into<String>,
        event_type: EventType,
        action: impl Into<String>,
        data: Value,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            event_type,
            action: action.into(),
            data,
            timestamp,
            user_id: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn key(&self) -> SubscriptionKey {
        SubscriptionKey::new(self.tenant_id.clone(), self.event_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type_feed_paths() {
        assert_eq!(
            EventType::Process.feed_path("acme"),
            "tenants/acme/events/process"
        );
        assert_eq!(
            EventType::Client.feed_path("acme"),
            "tenants/acme/events/client"
        );
        assert_eq!(
            EventType::System.feed_path("acme"),
            "tenants/acme/events/system"
        );
        assert_eq!(
            EventType::Notification.feed_path("acme"),
            "tenants/acme/notifications"
        );
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("process".parse::<EventType>().unwrap(), EventType::Process);
        assert_eq!(" Client ".parse::<EventType>().unwrap(), EventType::Client);
        assert_eq!(
            "notifications".parse::<EventType>().unwrap(),
            EventType::Notification
        );
        assert!("payment".parse::<EventType>().is_err());
    }

    #[test]
    fn test_subscription_key_display_is_log_form() {
        let key = SubscriptionKey::new("acme", EventType::Process);
        assert_eq!(key.to_string(), "acme:process");
    }

    #[test]
    fn test_subscription_key_does_not_collide_on_separator() {
        // "a:b" + process and "a" + "b:process" would collide as strings.
        let a = SubscriptionKey::new("a:b", EventType::Process);
        let b = SubscriptionKey::new("a", EventType::Process);
        assert_ne!(a, b);
        assert!(a.belongs_to("a:b"));
        assert!(!a.belongs_to("a"));
    }

    #[test]
    fn test_event_deserializes_wire_shape() {
        let event: Event = serde_json::from_value(json!({
            "id": "e1",
            "tenantId": "acme",
            "eventType": "process",
            "action": "created",
            "data": {"id": "p1"},
            "timestamp": 1_700_000_000_000_i64,
            "userId": "u1"
        }))
        .unwrap();

        assert_eq!(event.event_type, EventType::Process);
        assert_eq!(event.user_id.as_deref(), Some("u1"));
        assert_eq!(event.data["id"], "p1");
    }

    #[test]
    fn test_event_serializes_type_field() {
        let event = Event::new("e1", "acme", EventType::Client, "updated", json!(null), 1);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "client");
        assert_eq!(json["tenantId"], "acme");
        assert!(json.get("userId").is_none());
    }
}
