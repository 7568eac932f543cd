//! Universal event processor.
//!
//! The owned `*` subscriber that ties the bus to the driver registry.
//! Each event is routed to the drivers whose capabilities cover its
//! type; their output events are published back onto the bus.  Events
//! with no consumer at all are parked as orphans.  Conversation-typed
//! events are stamped with their session turn number before dispatch
//! (only when the edge has not already stamped one).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use vx_bus::{handler_fn, EventBus, OrphanReason, SubscribeOptions};
use vx_conversations::ConversationManager;
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverRegistry};

pub const CHAT_EVENT_TYPE: &str = "llm.chat";
pub const CHAT_RESPONSE_EVENT_TYPE: &str = "llm.chat.response";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Metrics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct MetricsInner {
    total_events: u64,
    total_errors: u64,
    total_orphaned: u64,
    event_types: HashMap<String, u64>,
    error_types: HashMap<String, u64>,
    orphaned_types: HashMap<String, u64>,
}

/// Snapshot of processor counters with derived rates.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessorMetrics {
    pub total_events: u64,
    pub total_errors: u64,
    pub total_orphaned: u64,
    pub event_types: HashMap<String, u64>,
    pub error_types: HashMap<String, u64>,
    pub orphaned_types: HashMap<String, u64>,
    pub error_rate: f64,
    pub orphan_rate: f64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UniversalProcessor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct UniversalProcessor {
    bus: Arc<dyn EventBus>,
    drivers: Arc<DriverRegistry>,
    conversations: Arc<ConversationManager>,
    metrics: Mutex<MetricsInner>,
    subscription_id: Mutex<Option<String>>,
}

impl UniversalProcessor {
    pub fn new(
        bus: Arc<dyn EventBus>,
        drivers: Arc<DriverRegistry>,
        conversations: Arc<ConversationManager>,
    ) -> Self {
        Self {
            bus,
            drivers,
            conversations,
            metrics: Mutex::new(MetricsInner::default()),
            subscription_id: Mutex::new(None),
        }
    }

    /// Subscribe to every event as a system subscription.  Idempotent.
    pub async fn attach(self: Arc<Self>) -> Result<()> {
        if self.subscription_id.lock().is_some() {
            return Ok(());
        }
        let processor = self.clone();
        let handler = handler_fn(move |event| {
            let processor = processor.clone();
            async move { processor.handle_event(event).await }
        });
        let id = self
            .bus
            .subscribe("*", handler, SubscribeOptions::system())
            .await?;
        *self.subscription_id.lock() = Some(id);
        tracing::info!("universal processor attached to event bus");
        Ok(())
    }

    /// Remove the bus subscription.
    pub async fn detach(&self) -> Result<()> {
        let id = self.subscription_id.lock().take();
        if let Some(id) = id {
            self.bus.unsubscribe(&id).await?;
        }
        Ok(())
    }

    /// Bus-handler entry point: process, and surface a driver failure so
    /// the bus parks the event in the DLQ.
    async fn handle_event(&self, event: EventMessage) -> Result<()> {
        self.process_event(event).await.map(|_outputs| ())
    }

    /// Process one event; returns the published output events.
    ///
    /// Errors are returned only for failures that should dead-letter the
    /// event (driver failure, driver timeout, unusable chat event);
    /// "nothing consumed it" is not an error.
    pub async fn process_event(&self, mut event: EventMessage) -> Result<Vec<EventMessage>> {
        {
            let mut metrics = self.metrics.lock();
            metrics.total_events += 1;
            *metrics
                .event_types
                .entry(event.event_type.clone())
                .or_default() += 1;
        }

        // Conversation ordering: stamp user chat events exactly once (the
        // edge's stamp wins), attach assistant replies to their turn.
        if let Err(e) = self.apply_conversation_ordering(&mut event) {
            self.record_error(&e);
            return Err(e);
        }

        let routed = self.drivers.route(&event.event_type);
        if routed.is_empty() {
            if !self.bus.has_subscribers(&event.event_type).await {
                self.bus
                    .park_orphan(&event, OrphanReason::NoDriverMatched)
                    .await;
                let mut metrics = self.metrics.lock();
                metrics.total_orphaned += 1;
                *metrics
                    .orphaned_types
                    .entry(event.event_type.clone())
                    .or_default() += 1;
                tracing::debug!(
                    event_type = %event.event_type,
                    event_id = %event.id,
                    "no driver or subscriber — event drained as orphan"
                );
            }
            return Ok(Vec::new());
        }

        // A driver is consuming the event; the publish path could not see
        // drivers, so clear any speculative orphan record it left.
        self.bus.claim_orphan(&event.id).await;

        let mut outputs: Vec<EventMessage> = Vec::new();
        let mut first_failure: Option<Error> = None;
        for driver in routed {
            let manifest = driver.manifest();
            let budget = Duration::from_secs(manifest.resources.timeout_seconds);
            match tokio::time::timeout(budget, driver.handle(&event)).await {
                Ok(Ok(mut driver_outputs)) => {
                    outputs.append(&mut driver_outputs);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        driver_id = %manifest.id,
                        event_id = %event.id,
                        error = %e,
                        "driver failed to handle event"
                    );
                    self.drivers.record_failure(&manifest.id, &e.to_string());
                    let failure = Error::DriverFailure {
                        driver: manifest.id.clone(),
                        message: e.to_string(),
                    };
                    self.record_error(&failure);
                    first_failure.get_or_insert(failure);
                }
                Err(_) => {
                    tracing::warn!(
                        driver_id = %manifest.id,
                        event_id = %event.id,
                        timeout_secs = budget.as_secs(),
                        "driver timed out"
                    );
                    let failure = Error::Timeout(format!(
                        "driver {} exceeded {}s",
                        manifest.id,
                        budget.as_secs()
                    ));
                    self.drivers.record_failure(&manifest.id, &failure.to_string());
                    self.record_error(&failure);
                    first_failure.get_or_insert(failure);
                }
            }
        }

        for output in &outputs {
            if let Err(e) = self.bus.publish(output.clone(), None).await {
                tracing::warn!(
                    event_type = %output.event_type,
                    error = %e,
                    "failed to publish driver output event"
                );
                self.record_error(&e);
            }
        }

        match first_failure {
            Some(failure) if outputs.is_empty() => Err(failure),
            _ => Ok(outputs),
        }
    }

    fn apply_conversation_ordering(&self, event: &mut EventMessage) -> Result<()> {
        if event.event_type == CHAT_EVENT_TYPE && event.turn_number().is_none() {
            let (turn_number, history) = self.conversations.process_user_event(event)?;
            event.set_turn_number(turn_number);
            event.data.insert(
                "messages".into(),
                serde_json::to_value(&history).map_err(Error::Json)?,
            );
        } else if event.event_type == CHAT_RESPONSE_EVENT_TYPE {
            if let Some(turn_number) = event.turn_number() {
                self.conversations.process_assistant_event(event, turn_number)?;
            } else {
                tracing::warn!(event_id = %event.id, "chat response missing turn number");
            }
        }
        Ok(())
    }

    fn record_error(&self, error: &Error) {
        let mut metrics = self.metrics.lock();
        metrics.total_errors += 1;
        *metrics.error_types.entry(error.kind().into()).or_default() += 1;
    }

    pub fn metrics(&self) -> ProcessorMetrics {
        let metrics = self.metrics.lock();
        let total = metrics.total_events.max(1) as f64;
        ProcessorMetrics {
            total_events: metrics.total_events,
            total_errors: metrics.total_errors,
            total_orphaned: metrics.total_orphaned,
            event_types: metrics.event_types.clone(),
            error_types: metrics.error_types.clone(),
            orphaned_types: metrics.orphaned_types.clone(),
            error_rate: metrics.total_errors as f64 / total,
            orphan_rate: metrics.total_orphaned as f64 / total,
        }
    }
}
