//! Dead-letter queue.
//!
//! Events whose handler raised (or timed out) are parked here keyed by
//! (subject, event id), with a bounded TTL.  The DLQ is the remediation
//! surface for bad handlers — the subscription itself stays registered.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use vx_domain::event::EventMessage;

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub event: EventMessage,
    /// The subscription subject whose handler failed.
    pub subject: String,
    pub error: String,
    pub parked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

pub struct DeadLetterStore {
    max_size: usize,
    ttl: Duration,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
    evictions: AtomicU64,
}

impl DeadLetterStore {
    pub fn new(max_size: usize, ttl_seconds: u64) -> Self {
        Self {
            max_size,
            ttl: Duration::seconds(ttl_seconds as i64),
            entries: Mutex::new(VecDeque::new()),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn park(&self, event: &EventMessage, subject: &str, error: &str) {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        entries.push_back(DeadLetterEntry {
            event: event.clone(),
            subject: subject.to_owned(),
            error: error.to_owned(),
            parked_at: now,
            expires_at: now + self.ttl,
        });
        while entries.len() > self.max_size {
            entries.pop_front();
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Remove and return the entry for `event_id`, if still retained.
    pub fn take(&self, event_id: &str) -> Option<DeadLetterEntry> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        let pos = entries.iter().position(|e| e.event.id == event_id)?;
        entries.remove(pos)
    }

    pub fn snapshot(&self, max_items: Option<usize>) -> Vec<DeadLetterEntry> {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        let take = max_items.unwrap_or(entries.len());
        entries.iter().take(take).cloned().collect()
    }

    pub fn len(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.lock();
        Self::purge_expired(&mut entries, now);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    fn purge_expired(entries: &mut VecDeque<DeadLetterEntry>, now: DateTime<Utc>) {
        entries.retain(|e| e.expires_at > now);
    }
}
