//! In-process event bus.
//!
//! Delivery pipeline: `publish` validates, deduplicates, and records the
//! event, then enqueues a delivery job on a bounded main queue.  A router
//! task fans each job out to bounded per-subscription queues; every
//! subscription has its own dispatch task that invokes the handler one
//! event at a time.  That gives per-subscription FIFO while handlers for
//! distinct subscriptions run concurrently.  Handler failures and
//! timeouts park the event in the dead-letter store; the subscription
//! itself stays registered — the DLQ is the remediation surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vx_domain::config::{BusConfig, DedupConfig, ReplayConfig};
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_domain::health::HealthCheckResult;

use crate::dead_letter::{DeadLetterEntry, DeadLetterStore};
use crate::dedup::DedupCache;
use crate::history::EventHistory;
use crate::orphan::{OrphanReason, OrphanRecord, OrphanStore};
use crate::subject;
use crate::traits::{BusMetrics, EventBus, EventFilter, EventHandler, SubscribeOptions};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Subscriptions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct Subscription {
    id: String,
    subject: String,
    topic: Option<String>,
    filter: Option<EventFilter>,
    system: bool,
    tx: mpsc::Sender<EventMessage>,
    /// Cleared on unsubscribe so already-queued events are skipped.
    active: Arc<AtomicBool>,
}

impl Subscription {
    fn matches(&self, event_type: &str, topic: Option<&str>) -> bool {
        if !subject::matches(&self.subject, event_type) {
            return false;
        }
        match (&self.topic, topic) {
            (Some(want), Some(got)) => want == got,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

#[derive(Default)]
struct SubscriptionTable {
    exact: HashMap<String, Vec<Arc<Subscription>>>,
    wildcard: Vec<Arc<Subscription>>,
    by_id: HashMap<String, Arc<Subscription>>,
}

impl SubscriptionTable {
    fn insert(&mut self, sub: Arc<Subscription>) {
        if subject::is_wildcard(&sub.subject) {
            self.wildcard.push(sub.clone());
        } else {
            self.exact
                .entry(sub.subject.clone())
                .or_default()
                .push(sub.clone());
        }
        self.by_id.insert(sub.id.clone(), sub);
    }

    fn remove(&mut self, id: &str) -> Option<Arc<Subscription>> {
        let sub = self.by_id.remove(id)?;
        if subject::is_wildcard(&sub.subject) {
            self.wildcard.retain(|s| s.id != id);
        } else if let Some(list) = self.exact.get_mut(&sub.subject) {
            list.retain(|s| s.id != id);
            if list.is_empty() {
                self.exact.remove(&sub.subject);
            }
        }
        Some(sub)
    }

    /// All subscriptions matching (subject pattern + topic).
    fn matching(&self, event_type: &str, topic: Option<&str>) -> Vec<Arc<Subscription>> {
        let mut hits: Vec<Arc<Subscription>> = Vec::new();
        if let Some(list) = self.exact.get(event_type) {
            hits.extend(list.iter().filter(|s| s.matches(event_type, topic)).cloned());
        }
        hits.extend(
            self.wildcard
                .iter()
                .filter(|s| s.matches(event_type, topic))
                .cloned(),
        );
        hits
    }

    fn clear(&mut self) {
        self.exact.clear();
        self.wildcard.clear();
        self.by_id.clear();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    deduplicated: AtomicU64,
    ttl_dropped: AtomicU64,
    orphaned: AtomicU64,
    dead_lettered: AtomicU64,
    handler_errors: AtomicU64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Phase {
    Created,
    Running,
    Stopped,
}

struct Lifecycle {
    phase: Phase,
    main_tx: Option<mpsc::Sender<DeliveryJob>>,
    router: Option<JoinHandle<()>>,
}

struct DeliveryJob {
    event: EventMessage,
    subs: Vec<Arc<Subscription>>,
}

struct BusInner {
    bus_config: BusConfig,
    dedup_enabled: bool,
    dedup: DedupCache,
    replay_enabled: bool,
    history: EventHistory,
    orphans: OrphanStore,
    dead_letters: DeadLetterStore,
    subscriptions: RwLock<SubscriptionTable>,
    dispatch_tasks: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
    counters: Counters,
    cancel: CancellationToken,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LocalEventBus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LocalEventBus {
    inner: Arc<BusInner>,
}

impl LocalEventBus {
    pub fn new(dedup: DedupConfig, replay: ReplayConfig, bus: BusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                dedup_enabled: dedup.enabled,
                dedup: DedupCache::new(
                    Duration::from_secs(dedup.window_seconds),
                    dedup.max_cache_size.max(1),
                ),
                replay_enabled: replay.enabled,
                history: EventHistory::new(replay.max_history_size, replay.retention_seconds),
                orphans: OrphanStore::new(bus.max_orphaned_events),
                dead_letters: DeadLetterStore::new(
                    bus.max_dead_letter_events,
                    bus.dead_letter_ttl_seconds,
                ),
                subscriptions: RwLock::new(SubscriptionTable::default()),
                dispatch_tasks: Mutex::new(Vec::new()),
                lifecycle: Mutex::new(Lifecycle {
                    phase: Phase::Created,
                    main_tx: None,
                    router: None,
                }),
                counters: Counters::default(),
                cancel: CancellationToken::new(),
                bus_config: bus,
            }),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(
            DedupConfig::default(),
            ReplayConfig::default(),
            BusConfig::default(),
        )
    }

    fn phase(&self) -> Phase {
        self.inner.lifecycle.lock().phase
    }

    async fn publish_internal(
        &self,
        event: EventMessage,
        topic: Option<&str>,
        bypass_dedup: bool,
    ) -> Result<()> {
        let inner = &self.inner;
        if self.phase() != Phase::Running {
            return Err(Error::BusUnavailable("bus is not running".into()));
        }

        if event.is_expired() {
            inner.counters.ttl_dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "dropping expired event at publish"
            );
            return Err(Error::TtlExpired(event.id));
        }

        if inner.dedup_enabled
            && !bypass_dedup
            && inner.dedup.check_and_insert(&event.dedup_key())
        {
            inner.counters.deduplicated.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "duplicate event dropped"
            );
            return Ok(());
        }

        if inner.replay_enabled {
            inner.history.record(&event, topic);
        }
        inner.counters.published.fetch_add(1, Ordering::Relaxed);

        // Snapshot matching subscriptions under the read lock; deliver
        // outside it.
        let matching = inner.subscriptions.read().matching(&event.event_type, topic);

        let has_consumer = matching.iter().any(|s| !s.system);
        if !has_consumer && inner.orphans.park(&event, OrphanReason::NoSubscribers) {
            inner.counters.orphaned.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                event_id = %event.id,
                event_type = %event.event_type,
                "no subscribers — event parked as orphan"
            );
        }

        // Per-event filters are evaluated here so delivery jobs only carry
        // subscriptions that will actually run.
        let deliver: Vec<Arc<Subscription>> = matching
            .into_iter()
            .filter(|s| s.filter.as_ref().map(|f| f.matches(&event)).unwrap_or(true))
            .collect();
        if deliver.is_empty() {
            return Ok(());
        }

        let tx = inner.lifecycle.lock().main_tx.clone();
        let Some(tx) = tx else {
            return Err(Error::BusUnavailable("delivery pipeline is down".into()));
        };
        match tx.try_send(DeliveryJob { event, subs: deliver }) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(Error::BusFull),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(Error::BusUnavailable("delivery pipeline is down".into()))
            }
        }
    }
}

// ── Router & dispatch tasks ──────────────────────────────────────────

async fn run_router(mut rx: mpsc::Receiver<DeliveryJob>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(job) => {
                    for sub in &job.subs {
                        // A closed channel means the subscription is gone.
                        if sub.tx.send(job.event.clone()).await.is_err() {
                            tracing::trace!(subscription = %sub.id, "skipping closed subscription queue");
                        }
                    }
                }
                None => break,
            },
            _ = cancel.cancelled() => break,
        }
    }
}

struct DispatchContext {
    subscription_id: String,
    subject: String,
    handler: Arc<dyn EventHandler>,
    active: Arc<AtomicBool>,
    timeout: Duration,
}

async fn run_dispatch(
    ctx: DispatchContext,
    mut rx: mpsc::Receiver<EventMessage>,
    inner: Arc<BusInner>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            maybe = rx.recv() => match maybe {
                Some(event) => dispatch_one(&ctx, event, &inner).await,
                None => break,
            },
            _ = cancel.cancelled() => {
                // Drain what is already queued, then exit.
                while let Ok(event) = rx.try_recv() {
                    dispatch_one(&ctx, event, &inner).await;
                }
                break;
            }
        }
    }
}

async fn dispatch_one(ctx: &DispatchContext, event: EventMessage, inner: &BusInner) {
    if !ctx.active.load(Ordering::Acquire) {
        return;
    }
    if event.is_expired() {
        inner.counters.ttl_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(event_id = %event.id, "event expired in queue, dropping");
        return;
    }
    match tokio::time::timeout(ctx.timeout, ctx.handler.handle(event.clone())).await {
        Ok(Ok(())) => {
            inner.counters.delivered.fetch_add(1, Ordering::Relaxed);
        }
        Ok(Err(e)) => {
            inner.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                subscription = %ctx.subscription_id,
                event_id = %event.id,
                error = %e,
                "handler failed, parking event in dead-letter queue"
            );
            inner.dead_letters.park(&event, &ctx.subject, &e.to_string());
            inner.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
        Err(_) => {
            inner.counters.handler_errors.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                subscription = %ctx.subscription_id,
                event_id = %event.id,
                timeout_secs = ctx.timeout.as_secs(),
                "handler timed out, parking event in dead-letter queue"
            );
            inner
                .dead_letters
                .park(&event, &ctx.subject, "handler timed out");
            inner.counters.dead_lettered.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventBus impl
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl EventBus for LocalEventBus {
    async fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let mut lifecycle = inner.lifecycle.lock();
        match lifecycle.phase {
            Phase::Running => Ok(()),
            Phase::Stopped => Err(Error::BusUnavailable(
                "a stopped bus cannot be restarted".into(),
            )),
            Phase::Created => {
                let (tx, rx) = mpsc::channel(inner.bus_config.delivery_queue_size);
                let router = tokio::spawn(run_router(rx, inner.cancel.clone()));
                lifecycle.main_tx = Some(tx);
                lifecycle.router = Some(router);
                lifecycle.phase = Phase::Running;
                tracing::info!(
                    queue_size = inner.bus_config.delivery_queue_size,
                    "local event bus started"
                );
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<()> {
        let inner = &self.inner;
        let (main_tx, router) = {
            let mut lifecycle = inner.lifecycle.lock();
            if lifecycle.phase == Phase::Stopped {
                return Ok(());
            }
            lifecycle.phase = Phase::Stopped;
            (lifecycle.main_tx.take(), lifecycle.router.take())
        };

        // Closing the main queue lets the router drain and exit.
        drop(main_tx);

        let drain = Duration::from_secs(inner.bus_config.shutdown_drain_seconds);
        let deadline = Instant::now() + drain;

        if let Some(router) = router {
            if tokio::time::timeout(drain, router).await.is_err() {
                tracing::warn!("router did not drain in time, cancelling");
                inner.cancel.cancel();
            }
        }

        // Dropping the subscription table closes every per-subscription
        // channel; dispatch tasks drain their queues and exit.
        inner.subscriptions.write().clear();

        let tasks: Vec<JoinHandle<()>> = inner.dispatch_tasks.lock().drain(..).collect();
        for mut task in tasks {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, &mut task).await.is_err() {
                // Bounded drain elapsed; force the rest down.
                inner.cancel.cancel();
                task.abort();
            }
        }

        tracing::info!(
            dead_letters = inner.dead_letters.len(),
            orphans = inner.orphans.len(),
            "local event bus stopped"
        );
        Ok(())
    }

    async fn publish(&self, event: EventMessage, topic: Option<&str>) -> Result<()> {
        self.publish_internal(event, topic, false).await
    }

    async fn publish_batch(
        &self,
        events: Vec<EventMessage>,
        topic: Option<&str>,
    ) -> Vec<(usize, Error)> {
        let mut failures = Vec::new();
        for (index, event) in events.into_iter().enumerate() {
            if let Err(e) = self.publish_internal(event, topic, false).await {
                failures.push((index, e));
            }
        }
        failures
    }

    async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
        opts: SubscribeOptions,
    ) -> Result<String> {
        if subject.is_empty() {
            return Err(Error::InvalidInput("subscription subject must not be empty".into()));
        }
        let inner = &self.inner;
        if self.phase() == Phase::Stopped {
            return Err(Error::BusUnavailable("bus is stopped".into()));
        }

        let id = uuid::Uuid::new_v4().to_string();
        let active = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(inner.bus_config.subscription_queue_size);

        let sub = Arc::new(Subscription {
            id: id.clone(),
            subject: subject.to_owned(),
            topic: opts.topic,
            filter: opts.filter,
            system: opts.system,
            tx,
            active: active.clone(),
        });

        let ctx = DispatchContext {
            subscription_id: id.clone(),
            subject: subject.to_owned(),
            handler,
            active,
            timeout: Duration::from_secs(inner.bus_config.handler_timeout_seconds),
        };
        let task = tokio::spawn(run_dispatch(
            ctx,
            rx,
            inner.clone(),
            inner.cancel.clone(),
        ));
        inner.dispatch_tasks.lock().push(task);

        inner.subscriptions.write().insert(sub);
        tracing::debug!(subscription = %id, subject = %subject, system = opts.system, "subscription created");
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        if let Some(sub) = self.inner.subscriptions.write().remove(subscription_id) {
            // Queued-but-undelivered events must be skipped too.
            sub.active.store(false, Ordering::Release);
            tracing::debug!(subscription = %subscription_id, "subscription removed");
        }
        Ok(())
    }

    async fn has_subscribers(&self, subject: &str) -> bool {
        self.inner
            .subscriptions
            .read()
            .matching(subject, None)
            .iter()
            .any(|s| !s.system)
    }

    async fn park_orphan(&self, event: &EventMessage, reason: OrphanReason) -> bool {
        if self.inner.orphans.park(event, reason) {
            self.inner.counters.orphaned.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    async fn claim_orphan(&self, event_id: &str) -> bool {
        if self.inner.orphans.claim(event_id) {
            // The event found a consumer after all; keep the counter honest.
            let counters = &self.inner.counters;
            let _ = counters
                .orphaned
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1));
            true
        } else {
            false
        }
    }

    async fn get_orphaned_events(&self, max_items: Option<usize>) -> Result<Vec<OrphanRecord>> {
        Ok(self.inner.orphans.snapshot(max_items))
    }

    async fn drain_orphaned_events(
        &self,
        event_types: Option<&[String]>,
        before: Option<DateTime<Utc>>,
    ) -> Result<usize> {
        Ok(self.inner.orphans.drain(event_types, before))
    }

    async fn get_dead_letter_events(
        &self,
        max_items: Option<usize>,
    ) -> Result<Vec<DeadLetterEntry>> {
        Ok(self.inner.dead_letters.snapshot(max_items))
    }

    async fn reprocess_dead_letter_event(&self, event_id: &str) -> Result<()> {
        let entry = self
            .inner
            .dead_letters
            .take(event_id)
            .ok_or_else(|| Error::NotFound(format!("dead letter event {event_id}")))?;
        // Bypass dedup: the original delivery already claimed the key.
        self.publish_internal(entry.event, None, true).await
    }

    async fn replay_events(
        &self,
        start: DateTime<Utc>,
        end: Option<DateTime<Utc>>,
        topic: Option<&str>,
        event_types: Option<&[String]>,
    ) -> Result<Vec<EventMessage>> {
        Ok(self.inner.history.replay(start, end, topic, event_types))
    }

    async fn get_event_history(
        &self,
        correlation_id: Option<&str>,
    ) -> Result<Vec<EventMessage>> {
        Ok(self.inner.history.by_correlation(correlation_id))
    }

    async fn health_check(&self) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let inner = &self.inner;
        let (phase, queue_depth, capacity) = {
            let lifecycle = inner.lifecycle.lock();
            let (depth, cap) = lifecycle
                .main_tx
                .as_ref()
                .map(|tx| (tx.max_capacity() - tx.capacity(), tx.max_capacity()))
                .unwrap_or((0, 0));
            (lifecycle.phase, depth, cap)
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;

        let result = match phase {
            Phase::Running if capacity > 0 && queue_depth * 10 >= capacity * 9 => {
                HealthCheckResult::degraded(latency_ms, "delivery queue above 90% capacity")
            }
            Phase::Running => HealthCheckResult::healthy(latency_ms),
            Phase::Created => HealthCheckResult::degraded(latency_ms, "bus not started"),
            Phase::Stopped => HealthCheckResult::unhealthy(latency_ms, "bus stopped"),
        };
        Ok(result
            .with_detail("queue_depth", json!(queue_depth))
            .with_detail("subscriptions", json!(inner.subscriptions.read().by_id.len()))
            .with_detail("dead_letters", json!(inner.dead_letters.len()))
            .with_detail("orphans", json!(inner.orphans.len())))
    }

    fn metrics(&self) -> BusMetrics {
        let inner = &self.inner;
        let queue_depth = inner
            .lifecycle
            .lock()
            .main_tx
            .as_ref()
            .map(|tx| tx.max_capacity() - tx.capacity())
            .unwrap_or(0);
        BusMetrics {
            published: inner.counters.published.load(Ordering::Relaxed),
            delivered: inner.counters.delivered.load(Ordering::Relaxed),
            deduplicated: inner.counters.deduplicated.load(Ordering::Relaxed),
            ttl_dropped: inner.counters.ttl_dropped.load(Ordering::Relaxed),
            orphaned: inner.counters.orphaned.load(Ordering::Relaxed),
            dead_lettered: inner.counters.dead_lettered.load(Ordering::Relaxed),
            handler_errors: inner.counters.handler_errors.load(Ordering::Relaxed),
            orphan_evictions: inner.orphans.evictions(),
            dead_letter_evictions: inner.dead_letters.evictions(),
            queue_depth,
            subscriptions: inner.subscriptions.read().by_id.len(),
        }
    }
}
