//! # despa-core
//!
//! Core types, feed contracts, and filters for despa-sync.
//!
//! This crate provides the event data model, the traits describing the
//! backing realtime feed, and the two stateless-or-local building blocks of
//! the sync pipeline: the recency filter and the per-consumer dedup set.

pub mod clock;
pub mod dedup;
pub mod defaults;
pub mod error;
pub mod feed;
pub mod logging;
pub mod memory_feed;
pub mod models;
pub mod recency;

// Re-export commonly used types at crate root
pub use clock::{Clock, ManualClock, SystemClock};
pub use dedup::DedupSet;
pub use error::{Error, Result};
pub use feed::{FeedSubscription, FeedWriter, RealtimeFeed, Snapshot, SnapshotCallback};
pub use memory_feed::MemoryFeed;
pub use models::{Event, EventType, SubscriptionKey};
pub use recency::{filter_recent, is_fresh};
