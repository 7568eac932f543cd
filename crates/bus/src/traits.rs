//! The event bus contract.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_domain::health::HealthCheckResult;

use crate::dead_letter::DeadLetterEntry;
use crate::orphan::{OrphanReason, OrphanRecord};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handlers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A subscriber's event handler.  Must be safe for concurrent invocation
/// across events from different subscriptions; within one subscription
/// events are delivered one at a time.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EventMessage) -> Result<()>;
}

struct FnHandler<F>(F);

#[async_trait::async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(EventMessage) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&self, event: EventMessage) -> Result<()> {
        (self.0)(event).await
    }
}

/// Wrap an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(EventMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscription options & filters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Predicate over event payload/metadata: a map of dotted paths
/// (`data.value`, `metadata.session_id`, or the top-level `type`,
/// `source`, `user_id`) to expected JSON values.  An empty filter matches
/// every event.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    expected: HashMap<String, Value>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(mut self, path: impl Into<String>, value: Value) -> Self {
        self.expected.insert(path.into(), value);
        self
    }

    pub fn matches(&self, event: &EventMessage) -> bool {
        self.expected.iter().all(|(path, expected)| {
            lookup(event, path).map(|actual| actual == *expected).unwrap_or(false)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.expected.is_empty()
    }
}

fn lookup(event: &EventMessage, path: &str) -> Option<Value> {
    if let Some(rest) = path.strip_prefix("data.") {
        let mut current = event.data.get(rest.split('.').next()?)?;
        for segment in rest.split('.').skip(1) {
            current = current.get(segment)?;
        }
        return Some(current.clone());
    }
    if let Some(key) = path.strip_prefix("metadata.") {
        return event.metadata.get(key).cloned();
    }
    match path {
        "type" => Some(Value::String(event.event_type.clone())),
        "source" => Some(Value::String(event.source.clone())),
        "user_id" => Some(Value::String(event.user_id.clone())),
        _ => None,
    }
}

/// Options for [`EventBus::subscribe`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Logical namespace.  A subscription with a topic only receives
    /// events published to the same topic; without one it receives all.
    pub topic: Option<String>,
    pub filter: Option<EventFilter>,
    /// System subscriptions (the universal processor's `*`) are invisible
    /// to `has_subscribers` and to orphan detection — otherwise a
    /// match-all consumer would make every event look consumed.
    pub system: bool,
}

impl SubscribeOptions {
    pub fn system() -> Self {
        Self {
            system: true,
            ..Default::default()
        }
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = Some(filter);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Point-in-time snapshot of bus counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusMetrics {
    pub published: u64,
    pub delivered: u64,
    pub deduplicated: u64,
    pub ttl_dropped: u64,
    pub orphaned: u64,
    pub dead_lettered: u64,
    pub handler_errors: u64,
    pub orphan_evictions: u64,
    pub dead_letter_evictions: u64,
    pub queue_depth: usize,
    pub subscriptions: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The bus contract implemented by [`crate::LocalEventBus`] and any
/// distributed backend.
#[async_trait::async_trait]
pub trait EventBus: Send + Sync {
    /// Begin processing events.  Idempotent while running.
    async fn start(&self) -> Result<()>;

    /// Stop intake, drain in-flight handlers with a bounded wait, then
    /// cancel what remains.  A stopped bus cannot be restarted.
    async fn stop(&self) -> Result<()>;

    /// Enqueue an event for delivery.  Returns once the event has been
    /// accepted into the in-process delivery pipeline.
    async fn publish(&self, event: EventMessage, topic: Option<&str>) -> Result<()>;

    /// Publish a batch.  Atomic per event: failures are reported by input
    /// index, successes are delivered regardless.
    async fn publish_batch(
        &self,
        events: Vec<EventMessage>,
        topic: Option<&str>,
    ) -> Vec<(usize, Error)>;

    /// Register a handler for a subject pattern.  Returns a subscription id.
    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
        opts: SubscribeOptions,
    ) -> Result<String>;

    /// Remove a subscription.  Idempotent; after return the handler will
    /// not be invoked again.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Whether any non-system subscription (literal or wildcard) would
    /// match this subject.
    async fn has_subscribers(&self, subject: &str) -> bool;

    /// Park an event in the orphan store on behalf of a consumer that
    /// could not route it (the universal processor).  Idempotent per
    /// event id; returns whether a new record was inserted.
    async fn park_orphan(&self, event: &EventMessage, reason: OrphanReason) -> bool;

    /// Remove an orphan record once a consumer has actually handled the
    /// event.  Publish-time orphan detection cannot see drivers, so the
    /// universal processor claims records for events it routed.
    async fn claim_orphan(&self, event_id: &str) -> bool;

    async fn get_orphaned_events(&self, max_items: Option<usize>) -> Result<Vec<OrphanRecord>>;

    /// Evict orphan records, optionally filtered by event type and age.
    /// Returns the number drained.
    async fn drain_orphaned_events(
        &self,
        event_types: Option<&[String]>,
        before: Option<DateTime<Utc>>,
    ) -> Result<usize>;

    async fn get_dead_letter_events(
        &self,
        max_items: Option<usize>,
    ) -> Result<Vec<DeadLetterEntry>>;

    /// Remove a DLQ entry and re-publish its event once.
    async fn reprocess_dead_letter_event(&self, event_id: &str) -> Result<()>;

    /// Read-only history cursor over retained events.
    async fn replay_events(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        topic: Option<&str>,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventMessage>>;

    /// Retained history, optionally narrowed to one correlation id.
    async fn get_event_history(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Vec<EventMessage>>;

    async fn health_check(&self) -> Result<HealthCheckResult>;

    fn metrics(&self) -> BusMetrics;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_filter_matches_all() {
        let event = EventMessage::new("test.event", json!({"x": 1}));
        assert!(EventFilter::new().matches(&event));
    }

    #[test]
    fn filter_on_data_and_metadata_paths() {
        let event = EventMessage::new("test.event", json!({"outer": {"inner": 42}}))
            .with_session_id("s1")
            .with_source("web");

        let hit = EventFilter::new()
            .field("data.outer.inner", json!(42))
            .field("metadata.session_id", json!("s1"))
            .field("source", json!("web"));
        assert!(hit.matches(&event));

        let miss = EventFilter::new().field("data.outer.inner", json!(43));
        assert!(!miss.matches(&event));

        let missing_path = EventFilter::new().field("data.nope", json!(1));
        assert!(!missing_path.matches(&event));
    }
}
