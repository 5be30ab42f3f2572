//! # despa-sync
//!
//! Tenant-scoped real-time event synchronization for the despachante back
//! office.
//!
//! This crate provides:
//! - The event source adapter turning feed snapshots into fresh events
//! - A shared registry with one feed subscription per `(tenant, type)` key
//!   and fan-out to every listener on that key
//! - Consumer bindings with deduplication and bounded history
//! - A process binding that applies `process` events to a local store
//! - The server-side relay writing published events onto the feed
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use despa_sync::{ConsumerOptions, EventType, MemoryFeed, SyncConsumer, SyncRegistry};
//!
//! let feed = MemoryFeed::new();
//! let registry = Arc::new(SyncRegistry::new(Arc::new(feed.clone())));
//!
//! let consumer = SyncConsumer::new(
//!     registry.clone(),
//!     ConsumerOptions::new("acme")
//!         .with_event_types(vec![EventType::Process, EventType::Notification])
//!         .with_on_event(|event| println!("{} {}", event.event_type, event.action)),
//! );
//!
//! assert!(consumer.is_connected());
//! ```

pub mod adapter;
pub mod config;
pub mod consumer;
pub mod process;
pub mod registry;
pub mod relay;

// Re-export core types
pub use despa_core::*;

pub use adapter::{events_from_snapshot, events_since, fresh_events, EventSourceAdapter};
pub use config::{ConfigError, ConfigResult, SyncConfig};
pub use consumer::{ConnectionStatus, ConsumerOptions, SyncConsumer};
pub use process::{InMemoryProcessStore, ProcessChange, ProcessRecord, ProcessStore, ProcessSync};
pub use registry::{Listener, ListenerHandle, ListenerId, SyncRegistry};
pub use relay::{EventRelay, NewNotification, Notification, NotificationKind, RelayEvent, RelayResult};
