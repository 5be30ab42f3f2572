//! Centralized default constants for despa-sync.
//!
//! Every crate references these constants instead of defining its own magic
//! numbers. Organized by domain area.

// =============================================================================
// RECENCY
// =============================================================================

/// Freshness window in milliseconds. Events with `now - timestamp >= window`
/// are never delivered.
pub const FRESHNESS_WINDOW_MS: i64 = 5_000;

// =============================================================================
// CONSUMER STATE
// =============================================================================

/// Maximum number of events kept in a consumer's visible history.
pub const HISTORY_CAPACITY: usize = 50;

/// Dedup set capacity. `None` keeps every delivered id for the consumer's
/// lifetime.
pub const DEDUP_CAPACITY: Option<usize> = None;

// =============================================================================
// FEED PATHS
// =============================================================================

/// Root segment under which all tenant data lives.
pub const TENANTS_ROOT: &str = "tenants";

/// Segment holding per-type event streams (`tenants/{id}/events/{type}`).
pub const EVENTS_SEGMENT: &str = "events";

/// Segment holding notification records (`tenants/{id}/notifications`).
pub const NOTIFICATIONS_SEGMENT: &str = "notifications";

// =============================================================================
// RELAY
// =============================================================================

/// Action recorded when a relayed event carries none.
pub const UNKNOWN_ACTION: &str = "unknown";

/// Source recorded when a relayed event carries none.
pub const RELAY_SOURCE: &str = "web";

/// Relay event type that is mirrored into the notifications collection.
pub const RELAY_NOTIFICATIONS_TYPE: &str = "notifications";

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Environment variable naming an explicit TOML config path.
pub const CONFIG_PATH_ENV: &str = "DESPA_SYNC_CONFIG";

/// Config file name looked up in the working directory when
/// [`CONFIG_PATH_ENV`] is unset.
pub const CONFIG_FILE_NAME: &str = "despa-sync.toml";
