//! Per-consumer deduplication of delivered events.
//!
//! The backing feed re-emits the whole snapshot on every mutation, so the same
//! logical event reaches a listener many times. A [`DedupSet`] lets each
//! consumer surface any given id at most once.

use std::collections::{HashSet, VecDeque};

use crate::{Event, EventType};

/// Set of `(event type, id)` pairs already delivered to one consumer.
///
/// Unbounded unless constructed with [`DedupSet::with_capacity_limit`], in
/// which case the oldest recorded ids are evicted first.
#[derive(Debug, Default)]
pub struct DedupSet {
    seen: HashSet<(EventType, String)>,
    order: VecDeque<(EventType, String)>,
    limit: Option<usize>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bounded set remembering at most `limit` ids. A limit of zero is
    /// raised to one.
    pub fn with_capacity_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit.max(1)),
            ..Self::default()
        }
    }

    /// Build from an optional limit, as carried in configuration.
    pub fn from_limit(limit: Option<usize>) -> Self {
        match limit {
            Some(limit) => Self::with_capacity_limit(limit),
            None => Self::new(),
        }
    }

    /// Check-and-record in one step: true the first time an event is seen,
    /// false afterwards.
    pub fn should_deliver(&mut self, event: &Event) -> bool {
        let key = (event.event_type, event.id.clone());
        if !self.seen.insert(key.clone()) {
            return false;
        }
        if let Some(limit) = self.limit {
            self.order.push_back(key);
            while self.order.len() > limit {
                if let Some(evicted) = self.order.pop_front() {
                    self.seen.remove(&evicted);
                }
            }
        }
        true
    }

    pub fn contains(&self, event: &Event) -> bool {
        self.seen.contains(&(event.event_type, event.id.clone()))
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
