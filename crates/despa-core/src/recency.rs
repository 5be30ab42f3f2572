//! Recency filter.
//!
//! The backing feed always delivers the full current snapshot of a path, not a
//! diff. Dropping everything older than the freshness window keeps late
//! subscribers and reconnects from replaying the whole event history.

use crate::Event;

/// Returns true when `timestamp` is inside the freshness window ending at
/// `now`.
///
/// Zero or negative timestamps count as `0` (maximally stale). Timestamps more
/// than one window ahead of `now` are treated as invalid and also rejected;
/// smaller skew between device clocks is accepted.
pub fn is_fresh(timestamp: i64, now: i64, window_ms: i64) -> bool {
    let timestamp = timestamp.max(0);
    if timestamp == 0 {
        return false;
    }
    let age = now.saturating_sub(timestamp);
    age < window_ms && age > -window_ms
}

/// Keeps only the events whose age relative to `now` is below `window_ms`.
pub fn filter_recent(events: Vec<Event>, now: i64, window_ms: i64) -> Vec<Event> {
    events
        .into_iter()
        .filter(|event| is_fresh(event.timestamp, now, window_ms))
        .collect()
}
