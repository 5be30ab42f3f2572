//! Integration tests for the recency filter and dedup set working together,
//! the way a consumer sees repeated snapshots of one stream.

use despa_core::{filter_recent, DedupSet, Event, EventType};
use serde_json::json;

const NOW: i64 = 1_700_000_000_000;
const WINDOW: i64 = 5_000;

fn event(id: &str, age_ms: i64) -> Event {
    Event::new(
        id,
        "acme",
        EventType::Process,
        "updated",
        json!({"id": format!("proc-{id}")}),
        NOW - age_ms,
    )
}

fn deliver(dedup: &mut DedupSet, snapshot: Vec<Event>, now: i64) -> Vec<String> {
    filter_recent(snapshot, now, WINDOW)
        .into_iter()
        .filter(|e| dedup.should_deliver(e))
        .map(|e| e.id)
        .collect()
}

#[test]
fn test_growing_snapshot_delivers_only_new_fresh_events() {
    let mut dedup = DedupSet::new();

    let first = deliver(&mut dedup, vec![event("stale", 9_000), event("a", 100)], NOW);
    assert_eq!(first, vec!["a"]);

    let second = deliver(
        &mut dedup,
        vec![event("stale", 9_000), event("a", 100), event("b", 50)],
        NOW,
    );
    assert_eq!(second, vec!["b"]);
    assert_eq!(dedup.len(), 2);
}

#[test]
fn test_same_id_on_other_type_is_distinct() {
    let mut dedup = DedupSet::new();
    let process = event("e1", 10);
    let mut client = event("e1", 10);
    client.event_type = EventType::Client;

    assert!(dedup.should_deliver(&process));
    assert!(dedup.should_deliver(&client));
    assert!(!dedup.should_deliver(&process));
}

#[test]
fn test_undated_and_future_records_never_pass() {
    let mut dedup = DedupSet::new();
    let mut undated = event("undated", 0);
    undated.timestamp = 0;
    let far_future = event("future", -60_000);

    assert!(deliver(&mut dedup, vec![undated, far_future], NOW).is_empty());
    assert!(dedup.is_empty());
}
