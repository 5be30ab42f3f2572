//! Structured logging field name constants for despa-sync.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query by the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | A listener panicked during fan-out |
//! | WARN  | Transport failure or malformed snapshot, contained |
//! | INFO  | Tenant connect/disconnect lifecycle |
//! | DEBUG | Subscription and listener bookkeeping |
//! | TRACE | Per-event dispatch |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "adapter", "registry", "consumer", "relay", "feed"
pub const SUBSYSTEM: &str = "subsystem";

/// Tenant the operation is scoped to.
pub const TENANT_ID: &str = "tenant_id";

/// Event category (`process`, `client`, `notification`, `system`).
pub const EVENT_TYPE: &str = "event_type";

/// Event id being dispatched or deduplicated.
pub const EVENT_ID: &str = "event_id";

/// Composite subscription key in `tenant:type` display form.
pub const SUBSCRIPTION_KEY: &str = "subscription_key";

/// Feed path a subscription or read is addressed to.
pub const FEED_PATH: &str = "feed_path";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Number of listeners registered for a key.
pub const LISTENER_COUNT: &str = "listener_count";

/// Number of events produced from one snapshot.
pub const EVENT_COUNT: &str = "event_count";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
