//! Bounded deduplication cache.
//!
//! Keys are [`EventMessage::dedup_key`] values.  An entry suppresses
//! re-delivery of the same key for `window`; the cache holds at most
//! `max_size` keys and evicts the oldest first.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub struct DedupCache {
    window: Duration,
    max_size: usize,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    seen: HashMap<String, Instant>,
    // Insertion order for size-based eviction.
    order: VecDeque<String>,
}

impl DedupCache {
    pub fn new(window: Duration, max_size: usize) -> Self {
        Self {
            window,
            max_size,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Record `key` and report whether it was already present within the
    /// window.  `true` means the event is a duplicate and must be dropped.
    pub fn check_and_insert(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        // Purge expired entries from the front of the insertion order.
        while let Some(oldest) = inner.order.front() {
            let expired = inner
                .seen
                .get(oldest)
                .map(|at| now.duration_since(*at) > self.window)
                .unwrap_or(true);
            if !expired {
                break;
            }
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }

        if let Some(at) = inner.seen.get(key) {
            if now.duration_since(*at) <= self.window {
                return true;
            }
        }

        inner.seen.insert(key.to_owned(), now);
        inner.order.push_back(key.to_owned());

        // Size cap: evict the oldest entries beyond capacity.
        while inner.seen.len() > self.max_size {
            if let Some(oldest) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            } else {
                break;
            }
        }

        false
    }

    pub fn len(&self) -> usize {
        self.inner.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
