//! Contracts with the backing realtime feed.
//!
//! The feed is an external managed realtime database treated as an opaque push
//! source. despa-sync needs two capabilities from it: a live subscription that
//! delivers the full current value of a path on every change, and a one-shot
//! read. Writers (the relay side) additionally need [`FeedWriter`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::Result;

/// Full current value of a feed path.
///
/// A null value and a missing value are the same thing: the path does not
/// exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    path: String,
    value: Option<Value>,
}

impl Snapshot {
    pub fn new(path: impl Into<String>, value: Option<Value>) -> Self {
        Self {
            path: path.into(),
            value: value.filter(|v| !v.is_null()),
        }
    }

    pub fn empty(path: impl Into<String>) -> Self {
        Self::new(path, None)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.value.is_some()
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<Value> {
        self.value
    }
}

/// Callback invoked with every snapshot (or transport failure) of a path.
pub type SnapshotCallback = Arc<dyn Fn(Result<Snapshot>) + Send + Sync>;

/// Handle to an open live subscription.
pub trait FeedSubscription: Send {
    /// Stop receiving snapshots. Implementations must tolerate a feed that
    /// already dropped the subscription.
    fn unsubscribe(self: Box<Self>);
}

/// Read side of the backing feed.
#[async_trait]
pub trait RealtimeFeed: Send + Sync {
    /// Open a live subscription on `path`.
    ///
    /// The callback may be invoked synchronously from inside this call with
    /// the current value, and afterwards whenever anything under the path
    /// changes.
    fn subscribe(&self, path: &str, callback: SnapshotCallback)
        -> Result<Box<dyn FeedSubscription>>;

    /// Fetch the current value of `path` once. `None` when it does not exist.
    async fn read_once(&self, path: &str) -> Result<Option<Value>>;
}

/// Write side of the backing feed, used by the event relay.
#[async_trait]
pub trait FeedWriter: Send + Sync {
    /// Replace the value at `path`. Writing null removes it.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Store `value` under a freshly generated, time-ordered child key of
    /// `path` and return that key.
    async fn push(&self, path: &str, value: Value) -> Result<String>;
}
