//! In-process realtime feed.
//!
//! Holds a JSON tree addressed by `/`-separated paths and behaves like the
//! managed realtime database from the point of view of a subscriber: every
//! write under, at, or above a subscribed path re-delivers that path's full
//! current snapshot. Used by tests and local development.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use despa_core::{MemoryFeed, RealtimeFeed, SnapshotCallback};
//! use serde_json::json;
//!
//! let feed = MemoryFeed::new();
//! let callback: SnapshotCallback = Arc::new(|snapshot| {
//!     let _ = snapshot;
//! });
//! let sub = feed.subscribe("tenants/acme/events/process", callback).unwrap();
//! feed.write("tenants/acme/events/process/e1", json!({"action": "created"}));
//! sub.unsubscribe();
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::feed::{FeedSubscription, FeedWriter, RealtimeFeed, Snapshot, SnapshotCallback};
use crate::{Error, Result};

struct Subscriber {
    path: Vec<String>,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct FeedState {
    root: Value,
    subscribers: BTreeMap<u64, Subscriber>,
    next_id: u64,
    refuse_subscriptions: bool,
    fail_reads: bool,
}

/// Shared in-memory feed. Clones share the same tree and subscribers.
#[derive(Clone, Default)]
pub struct MemoryFeed {
    state: Arc<Mutex<FeedState>>,
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join(segs: &[String]) -> String {
    segs.join("/")
}

fn is_prefix(prefix: &[String], path: &[String]) -> bool {
    prefix.len() <= path.len() && prefix.iter().zip(path).all(|(a, b)| a == b)
}

fn is_vacant(value: &Value) -> bool {
    value.is_null() || value.as_object().is_some_and(Map::is_empty)
}

fn get_at<'a>(node: &'a Value, segs: &[String]) -> Option<&'a Value> {
    segs.iter()
        .try_fold(node, |current, seg| current.as_object()?.get(seg))
        .filter(|v| !v.is_null())
}

fn set_at(node: &mut Value, segs: &[String], value: Value) {
    let Some((head, rest)) = segs.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        if value.is_null() {
            return;
        }
        *node = Value::Object(Map::new());
    }
    let Value::Object(map) = node else {
        return;
    };
    let child = map.entry(head.clone()).or_insert(Value::Null);
    set_at(child, rest, value);
    if is_vacant(child) {
        map.remove(head);
    }
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value at `path`, if any.
    pub fn get(&self, path: &str) -> Option<Value> {
        get_at(&self.lock().root, &segments(path)).cloned()
    }

    /// Replace the value at `path` and notify every related subscriber.
    pub fn write(&self, path: &str, value: Value) {
        let segs = segments(path);
        let deliveries: Vec<(SnapshotCallback, Snapshot)> = {
            let mut state = self.lock();
            set_at(&mut state.root, &segs, value);
            state
                .subscribers
                .values()
                .filter(|sub| is_prefix(&sub.path, &segs) || is_prefix(&segs, &sub.path))
                .map(|sub| {
                    let snapshot = Snapshot::new(
                        join(&sub.path),
                        get_at(&state.root, &sub.path).cloned(),
                    );
                    (sub.callback.clone(), snapshot)
                })
                .collect()
        };
        trace!(feed_path = path, subscriber_count = deliveries.len(), "MemoryFeed write");
        for (callback, snapshot) in deliveries {
            callback(Ok(snapshot));
        }
    }

    /// Remove the value at `path`.
    pub fn remove(&self, path: &str) {
        self.write(path, Value::Null);
    }

    /// Store `value` under a new UUIDv7 child key of `path`.
    pub fn push_value(&self, path: &str, value: Value) -> String {
        let key = uuid::Uuid::now_v7().to_string();
        self.write(&format!("{}/{key}", path.trim_end_matches('/')), value);
        key
    }

    /// Deliver a transport failure to every subscriber of exactly `path`.
    pub fn emit_error(&self, path: &str, error: Error) {
        let segs = segments(path);
        let callbacks: Vec<SnapshotCallback> = self
            .lock()
            .subscribers
            .values()
            .filter(|sub| sub.path == segs)
            .map(|sub| sub.callback.clone())
            .collect();
        for callback in callbacks {
            callback(Err(error.clone()));
        }
    }

    /// Make subsequent `subscribe` calls fail.
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.lock().refuse_subscriptions = refuse;
    }

    /// Make subsequent `read_once` calls fail.
    pub fn fail_reads(&self, fail: bool) {
        self.lock().fail_reads = fail;
    }

    /// Live subscriptions on exactly `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        let segs = segments(path);
        self.lock()
            .subscribers
            .values()
            .filter(|sub| sub.path == segs)
            .count()
    }

    pub fn total_subscribers(&self) -> usize {
        self.lock().subscribers.len()
    }
}

struct MemorySubscription {
    id: u64,
    state: Weak<Mutex<FeedState>>,
}

impl FeedSubscription for MemorySubscription {
    fn unsubscribe(self: Box<Self>) {
        if let Some(state) = self.state.upgrade() {
            let removed = state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .subscribers
                .remove(&self.id);
            debug!(subscription_id = self.id, removed = removed.is_some(), "MemoryFeed unsubscribe");
        }
    }
}

#[async_trait]
impl RealtimeFeed for MemoryFeed {
    fn subscribe(
        &self,
        path: &str,
        callback: SnapshotCallback,
    ) -> Result<Box<dyn FeedSubscription>> {
        let segs = segments(path);
        let (id, initial) = {
            let mut state = self.lock();
            if state.refuse_subscriptions {
                return Err(Error::Feed(format!("subscription refused: {path}")));
            }
            let id = state.next_id;
            state.next_id += 1;
            let initial = Snapshot::new(join(&segs), get_at(&state.root, &segs).cloned());
            state.subscribers.insert(
                id,
                Subscriber {
                    path: segs,
                    callback: callback.clone(),
                },
            );
            (id, initial)
        };
        debug!(feed_path = path, subscription_id = id, "MemoryFeed subscribe");
        callback(Ok(initial));
        Ok(Box::new(MemorySubscription {
            id,
            state: Arc::downgrade(&self.state),
        }))
    }

    async fn read_once(&self, path: &str) -> Result<Option<Value>> {
        let state = self.lock();
        if state.fail_reads {
            return Err(Error::Feed(format!("read failed: {path}")));
        }
        Ok(get_at(&state.root, &segments(path)).cloned())
    }
}

#[async_trait]
impl FeedWriter for MemoryFeed {
    async fn set(&self, path: &str, value: Value) -> Result<()> {
        self.write(path, value);
        Ok(())
    }

    async fn push(&self, path: &str, value: Value) -> Result<String> {
        Ok(self.push_value(path, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn recorder() -> (SnapshotCallback, Arc<Mutex<Vec<Result<Snapshot>>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let callback: SnapshotCallback = Arc::new(move |snap| sink.lock().unwrap().push(snap));
        (callback, seen)
    }

    #[test]
    fn test_subscribe_delivers_initial_snapshot() {
        let feed = MemoryFeed::new();
        feed.write("tenants/acme/events/process/e1", json!({"action": "created"}));

        let (callback, seen) = recorder();
        let _sub = feed.subscribe("tenants/acme/events/process", callback).unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let snap = seen[0].as_ref().unwrap();
        assert_eq!(snap.value().unwrap()["e1"]["action"], "created");
    }

    #[test]
    fn test_write_below_path_redelivers_full_snapshot() {
        let feed = MemoryFeed::new();
        let (callback, seen) = recorder();
        let _sub = feed.subscribe("tenants/acme/events/process", callback).unwrap();

        feed.write("tenants/acme/events/process/e1", json!({"n": 1}));
        feed.write("tenants/acme/events/process/e2", json!({"n": 2}));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(!seen[0].as_ref().unwrap().exists());
        let last = seen[2].as_ref().unwrap().value().unwrap();
        assert_eq!(last.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_unrelated_write_is_not_delivered() {
        let feed = MemoryFeed::new();
        let (callback, seen) = recorder();
        let _sub = feed.subscribe("tenants/acme/events/process", callback).unwrap();

        feed.write("tenants/other/events/process/e1", json!({"n": 1}));
        feed.write("tenants/acme/events/client/e1", json!({"n": 1}));

        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery_and_is_counted() {
        let feed = MemoryFeed::new();
        let (callback, seen) = recorder();
        let sub = feed.subscribe("a/b", callback).unwrap();
        assert_eq!(feed.subscriber_count("a/b"), 1);

        sub.unsubscribe();
        feed.write("a/b/c", json!(1));

        assert_eq!(feed.subscriber_count("a/b"), 0);
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_remove_prunes_empty_parents() {
        let feed = MemoryFeed::new();
        feed.write("a/b/c", json!(1));
        feed.remove("a/b/c");
        assert!(feed.get("a").is_none());
    }

    #[test]
    fn test_push_generates_distinct_keys() {
        let feed = MemoryFeed::new();
        let k1 = feed.push_value("tenants/acme/notifications", json!({"title": "a"}));
        let k2 = feed.push_value("tenants/acme/notifications", json!({"title": "b"}));
        assert_ne!(k1, k2);
        let all = feed.get("tenants/acme/notifications").unwrap();
        assert_eq!(all.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_refused_subscription_errors() {
        let feed = MemoryFeed::new();
        feed.refuse_subscriptions(true);
        let (callback, _) = recorder();
        assert!(matches!(
            feed.subscribe("a", callback),
            Err(Error::Feed(_))
        ));
    }

    #[tokio::test]
    async fn test_read_once_and_failures() {
        let feed = MemoryFeed::new();
        FeedWriter::set(&feed, "tenants/acme/config", json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(
            feed.read_once("tenants/acme/config").await.unwrap(),
            Some(json!({"x": 1}))
        );
        assert_eq!(feed.read_once("tenants/acme/missing").await.unwrap(), None);

        feed.fail_reads(true);
        assert!(feed.read_once("tenants/acme/config").await.is_err());
    }
}
