//! Breaker-wrapped providers.
//!
//! [`ResilientStorage`] and [`ResilientEventBus`] expose the same traits
//! as the providers they wrap; every operation flows through the
//! resource's circuit breaker.  `health_check` deliberately bypasses the
//! breaker — the health monitor must be able to observe a provider that
//! the breaker is currently refusing to call.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use vx_bus::{
    BusMetrics, DeadLetterEntry, EventBus, EventHandler, OrphanReason, OrphanRecord,
    SubscribeOptions,
};
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_domain::health::HealthCheckResult;
use vx_storage::{Document, OrderBy, QueryPredicate, StorageProvider};

use crate::breaker::CircuitBreaker;
use crate::health::HealthCheckable;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Health adapters
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Adapts a storage provider to the monitor's [`HealthCheckable`] trait.
pub struct StorageHealthAdapter(pub Arc<dyn StorageProvider>);

#[async_trait::async_trait]
impl HealthCheckable for StorageHealthAdapter {
    async fn health_check(&self) -> Result<HealthCheckResult> {
        self.0.health_check().await
    }
}

/// Adapts an event bus to the monitor's [`HealthCheckable`] trait.
pub struct BusHealthAdapter(pub Arc<dyn EventBus>);

#[async_trait::async_trait]
impl HealthCheckable for BusHealthAdapter {
    async fn health_check(&self) -> Result<HealthCheckResult> {
        self.0.health_check().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResilientStorage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ResilientStorage {
    inner: Arc<dyn StorageProvider>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientStorage {
    pub fn new(inner: Arc<dyn StorageProvider>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }
}

#[async_trait::async_trait]
impl StorageProvider for ResilientStorage {
    async fn create_container_if_not_exists(&self, name: &str) -> Result<()> {
        self.breaker
            .call(self.inner.create_container_if_not_exists(name))
            .await
    }

    async fn get(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<Option<Document>> {
        self.breaker
            .call(self.inner.get(container, id, partition_key))
            .await
    }

    async fn create(&self, container: &str, doc: Document) -> Result<Document> {
        self.breaker.call(self.inner.create(container, doc)).await
    }

    async fn update(&self, container: &str, doc: Document) -> Result<Document> {
        self.breaker.call(self.inner.update(container, doc)).await
    }

    async fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<()> {
        self.breaker
            .call(self.inner.delete(container, id, partition_key))
            .await
    }

    async fn query(
        &self,
        container: &str,
        predicate: QueryPredicate,
        partition_key: Option<&str>,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
    ) -> Result<Vec<Document>> {
        self.breaker
            .call(
                self.inner
                    .query(container, predicate, partition_key, limit, order_by),
            )
            .await
    }

    async fn health_check(&self) -> Result<HealthCheckResult> {
        // Bypasses the breaker: the monitor needs the truth.
        self.inner.health_check().await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ResilientEventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ResilientEventBus {
    inner: Arc<dyn EventBus>,
    breaker: Arc<CircuitBreaker>,
}

impl ResilientEventBus {
    pub fn new(inner: Arc<dyn EventBus>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn inner(&self) -> &Arc<dyn EventBus> {
        &self.inner
    }
}

#[async_trait::async_trait]
impl EventBus for ResilientEventBus {
    async fn start(&self) -> Result<()> {
        self.breaker.call(self.inner.start()).await
    }

    async fn stop(&self) -> Result<()> {
        // Shutdown must not be refused by an open breaker.
        self.inner.stop().await
    }

    async fn publish(&self, event: EventMessage, topic: Option<&str>) -> Result<()> {
        self.breaker.call(self.inner.publish(event, topic)).await
    }

    async fn publish_batch(
        &self,
        events: Vec<EventMessage>,
        topic: Option<&str>,
    ) -> Vec<(usize, Error)> {
        // Per-index failure reporting; the breaker sees the batch as one
        // call that succeeds unless the bus itself is down.
        let total = events.len();
        let result = self
            .breaker
            .call(async {
                Ok::<_, Error>(self.inner.publish_batch(events, topic).await)
            })
            .await;
        match result {
            Ok(failures) => failures,
            Err(e) => {
                let message = e.to_string();
                (0..total)
                    .map(|i| (i, Error::CircuitOpen(message.clone())))
                    .collect()
            }
        }
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
        opts: SubscribeOptions,
    ) -> Result<String> {
        self.breaker
            .call(self.inner.subscribe(subject, handler, opts))
            .await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.breaker
            .call(self.inner.unsubscribe(subscription_id))
            .await
    }

    async fn has_subscribers(&self, subject: &str) -> bool {
        self.inner.has_subscribers(subject).await
    }

    async fn park_orphan(&self, event: &EventMessage, reason: OrphanReason) -> bool {
        self.inner.park_orphan(event, reason).await
    }

    async fn claim_orphan(&self, event_id: &str) -> bool {
        self.inner.claim_orphan(event_id).await
    }

    async fn get_orphaned_events(&self, max_items: Option<usize>) -> Result<Vec<OrphanRecord>> {
        self.inner.get_orphaned_events(max_items).await
    }

    async fn drain_orphaned_events(
        &self,
        event_types: Option<&[String]>,
        before: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        self.inner.drain_orphaned_events(event_types, before).await
    }

    async fn get_dead_letter_events(
        &self,
        max_items: Option<usize>,
    ) -> Result<Vec<DeadLetterEntry>> {
        self.inner.get_dead_letter_events(max_items).await
    }

    async fn reprocess_dead_letter_event(&self, event_id: &str) -> Result<()> {
        self.breaker
            .call(self.inner.reprocess_dead_letter_event(event_id))
            .await
    }

    async fn replay_events(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        topic: Option<&str>,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventMessage>> {
        self.inner.replay_events(start, end, topic, event_types).await
    }

    async fn get_event_history(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Vec<EventMessage>> {
        self.inner.get_event_history(correlation_id).await
    }

    async fn health_check(&self) -> Result<HealthCheckResult> {
        // Bypasses the breaker: the monitor needs the truth.
        self.inner.health_check().await
    }

    fn metrics(&self) -> BusMetrics {
        self.inner.metrics()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::config::BreakerConfig;
    use vx_storage::MemoryStorageProvider;

    fn breaker(threshold: u32) -> Arc<CircuitBreaker> {
        Arc::new(CircuitBreaker::new(
            "storage",
            BreakerConfig {
                failure_threshold: threshold,
                ..Default::default()
            },
        ))
    }

    #[tokio::test]
    async fn operations_flow_through_the_breaker() {
        let storage = Arc::new(MemoryStorageProvider::new());
        let resilient = ResilientStorage::new(storage, breaker(5));

        resilient
            .create("c", Document::new("d1", "u1"))
            .await
            .unwrap();
        let doc = resilient.get("c", "d1", Some("u1")).await.unwrap();
        assert!(doc.is_some());
        assert!(resilient.breaker().is_closed());
    }

    #[tokio::test]
    async fn repeated_failures_open_and_reject() {
        let storage = Arc::new(MemoryStorageProvider::new());
        let resilient = ResilientStorage::new(storage, breaker(2));

        // `update` on a missing document fails.
        for _ in 0..2 {
            resilient
                .update("c", Document::new("missing", "u1"))
                .await
                .unwrap_err();
        }
        assert!(resilient.breaker().is_open());

        let err = resilient.get("c", "d1", None).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));

        // Health check still reaches the provider.
        assert!(resilient.health_check().await.is_ok());
    }
}
