//! Bounded event history for replay.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use vx_domain::event::EventMessage;

struct HistoryRecord {
    event: EventMessage,
    topic: Option<String>,
    recorded_at: DateTime<Utc>,
}

/// Ring buffer of recently published events.
///
/// Bounded by `max_size` (FIFO eviction) and by `retention` (entries past
/// retention are pruned on each write).
pub struct EventHistory {
    max_size: usize,
    retention: Duration,
    records: Mutex<VecDeque<HistoryRecord>>,
}

impl EventHistory {
    pub fn new(max_size: usize, retention_seconds: u64) -> Self {
        Self {
            max_size,
            retention: Duration::seconds(retention_seconds as i64),
            records: Mutex::new(VecDeque::new()),
        }
    }

    pub fn record(&self, event: &EventMessage, topic: Option<&str>) {
        let now = Utc::now();
        let mut records = self.records.lock();
        records.push_back(HistoryRecord {
            event: event.clone(),
            topic: topic.map(str::to_owned),
            recorded_at: now,
        });
        while records.len() > self.max_size {
            records.pop_front();
        }
        let cutoff = now - self.retention;
        while records
            .front()
            .map(|r| r.recorded_at < cutoff)
            .unwrap_or(false)
        {
            records.pop_front();
        }
    }

    /// Events whose timestamps fall in `[start, end]`, optionally narrowed
    /// by topic and event types.
    pub fn replay(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        topic: Option<&str>,
        event_types: Option<&[String]>,
    ) -> Vec<EventMessage> {
        let records = self.records.lock();
        records
            .iter()
            .filter(|r| r.event.timestamp >= start)
            .filter(|r| end.map(|e| r.event.timestamp <= e).unwrap_or(true))
            .filter(|r| topic.map(|t| r.topic.as_deref() == Some(t)).unwrap_or(true))
            .filter(|r| {
                event_types
                    .map(|types| types.iter().any(|t| *t == r.event.event_type))
                    .unwrap_or(true)
            })
            .map(|r| r.event.clone())
            .collect()
    }

    /// All retained events, or those sharing one correlation id.
    pub fn by_correlation(&self, correlation_id: Option<&str>) -> Vec<EventMessage> {
        let records = self.records.lock();
        records
            .iter()
            .filter(|r| {
                correlation_id
                    .map(|id| r.event.correlation_id() == Some(id))
                    .unwrap_or(true)
            })
            .map(|r| r.event.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn size_bound_evicts_oldest() {
        let history = EventHistory::new(3, 3600);
        for i in 0..5 {
            history.record(&EventMessage::new("test.event", json!({"index": i})), None);
        }
        let all = history.by_correlation(None);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].data.get("index"), Some(&json!(2)));
        assert_eq!(all[2].data.get("index"), Some(&json!(4)));
    }

    #[test]
    fn replay_filters_by_time_type_and_topic() {
        let history = EventHistory::new(100, 3600);
        let start = Utc::now() - Duration::seconds(1);

        history.record(&EventMessage::new("app.started", json!({})), Some("system"));
        history.record(&EventMessage::new("user.login", json!({})), Some("auth"));
        history.record(&EventMessage::new("user.logout", json!({})), Some("auth"));

        let auth = history.replay(start, None, Some("auth"), None);
        assert_eq!(auth.len(), 2);
        assert!(auth.iter().all(|e| e.event_type.starts_with("user.")));

        let logins = history.replay(start, None, None, Some(&["user.login".into()]));
        assert_eq!(logins.len(), 1);

        let none = history.replay(Utc::now() + Duration::seconds(10), None, None, None);
        assert!(none.is_empty());
    }

    #[test]
    fn correlation_lookup() {
        let history = EventHistory::new(100, 3600);
        for i in 0..5 {
            let event = EventMessage::new("workflow.step", json!({"step": i}))
                .with_correlation_id("workflow-123");
            history.record(&event, None);
        }
        history.record(&EventMessage::new("other.event", json!({})), None);

        let related = history.by_correlation(Some("workflow-123"));
        assert_eq!(related.len(), 5);
        assert!(related
            .iter()
            .all(|e| e.correlation_id() == Some("workflow-123")));

        assert_eq!(history.by_correlation(None).len(), 6);
    }
}
