//! Orphaned-event store.
//!
//! An orphan is an event that had no matching consumer at the moment it
//! was published.  Orphans are parked in a bounded ring so operators (and
//! the event monitor) can inspect what the system is dropping, then
//! drained explicitly or evicted FIFO when the ring fills.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use vx_domain::event::EventMessage;

/// Why an event was parked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanReason {
    /// No subscription (literal or wildcard) matched at publish time.
    NoSubscribers,
    /// The universal processor found no driver capability for the type.
    NoDriverMatched,
    /// TTL elapsed while the event sat in the delivery queue.
    TtlExpired,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanRecord {
    pub event: EventMessage,
    pub parked_at: DateTime<Utc>,
    pub reason: OrphanReason,
}

pub struct OrphanStore {
    max_size: usize,
    records: Mutex<VecDeque<OrphanRecord>>,
    evictions: AtomicU64,
}

impl OrphanStore {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            records: Mutex::new(VecDeque::new()),
            evictions: AtomicU64::new(0),
        }
    }

    /// Park an event.  Idempotent per event id — the publish path and the
    /// universal processor may both observe the same orphan, but only one
    /// record is kept.  Returns whether a new record was inserted.
    pub fn park(&self, event: &EventMessage, reason: OrphanReason) -> bool {
        let mut records = self.records.lock();
        if records.iter().any(|r| r.event.id == event.id) {
            return false;
        }
        records.push_back(OrphanRecord {
            event: event.clone(),
            parked_at: Utc::now(),
            reason,
        });
        while records.len() > self.max_size {
            records.pop_front();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Remove the record for one event, if present.  Used by consumers
    /// that handled an event the publish path had speculatively parked.
    pub fn claim(&self, event_id: &str) -> bool {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| r.event.id != event_id);
        records.len() < before
    }

    pub fn snapshot(&self, max_items: Option<usize>) -> Vec<OrphanRecord> {
        let records = self.records.lock();
        let take = max_items.unwrap_or(records.len());
        records.iter().take(take).cloned().collect()
    }

    /// Remove records matching the filters; both filters unset means
    /// drain everything.  Returns the number removed.
    pub fn drain(
        &self,
        event_types: Option<&[String]>,
        before: Option<DateTime<Utc>>,
    ) -> usize {
        let mut records = self.records.lock();
        let before_len = records.len();
        records.retain(|r| {
            let type_hit = event_types
                .map(|types| types.iter().any(|t| *t == r.event.event_type))
                .unwrap_or(true);
            let age_hit = before.map(|b| r.event.timestamp < b).unwrap_or(true);
            // Keep records that do NOT match both filters.
            !(type_hit && age_hit)
        });
        before_len - records.len()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn park_is_idempotent_per_event() {
        let store = OrphanStore::new(10);
        let event = EventMessage::new("test.orphan", json!({}));
        assert!(store.park(&event, OrphanReason::NoSubscribers));
        assert!(!store.park(&event, OrphanReason::NoDriverMatched));
        assert_eq!(store.len(), 1);
        assert_eq!(store.snapshot(None)[0].reason, OrphanReason::NoSubscribers);
    }

    #[test]
    fn ring_evicts_fifo() {
        let store = OrphanStore::new(3);
        for i in 0..5 {
            let event = EventMessage::new("test.orphan", json!({"index": i}));
            store.park(&event, OrphanReason::NoSubscribers);
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.evictions(), 2);
        let kept = store.snapshot(None);
        assert_eq!(kept[0].event.data.get("index"), Some(&json!(2)));
    }

    #[test]
    fn drain_by_type_and_age() {
        let store = OrphanStore::new(10);
        for i in 0..5 {
            let event = EventMessage::new(
                format!("test.orphan.type{}", i % 2),
                json!({"index": i}),
            );
            store.park(&event, OrphanReason::NoSubscribers);
        }

        let drained = store.drain(Some(&["test.orphan.type0".into()]), None);
        assert_eq!(drained, 3);
        assert_eq!(store.len(), 2);
        assert!(store
            .snapshot(None)
            .iter()
            .all(|r| r.event.event_type == "test.orphan.type1"));

        // Age filter: nothing is old enough.
        let old_cutoff = Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.drain(None, Some(old_cutoff)), 0);

        // Everything is older than a future cutoff.
        let future = Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.drain(None, Some(future)), 2);
        assert!(store.is_empty());
    }
}
