//! Runtime façade and wiring.
//!
//! [`RuntimeBuilder`] composes the configured providers into a
//! [`VextirRuntime`]: storage and bus are built by provider name (or
//! injected), optionally wrapped in circuit breakers and registered with
//! the health monitor, then the registries, conversation manager, and
//! universal processor are attached.  The runtime value is the only
//! handle — no process-global state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use vx_bus::{
    handler_fn, EventBus, EventFilter, EventHandler, LocalEventBus, SubscribeOptions,
};
use vx_conversations::ConversationManager;
use vx_domain::config::{ConfigSeverity, RuntimeConfig};
use vx_domain::error::{Error, Result};
use vx_domain::event::EventMessage;
use vx_registry::{Driver, DriverRegistry, ModelRegistry, ToolRegistry};
use vx_resilience::{
    BusHealthAdapter, HealthMonitor, ProviderStatus, ResilientEventBus, ResilientStorage,
    StorageHealthAdapter,
};
use vx_storage::{MemoryStorageProvider, StorageProvider};

use crate::monitor::EventMonitor;
use crate::processor::UniversalProcessor;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Builder
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct RuntimeBuilder {
    config: RuntimeConfig,
    storage: Option<Arc<dyn StorageProvider>>,
    bus: Option<Arc<dyn EventBus>>,
}

impl RuntimeBuilder {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            storage: None,
            bus: None,
        }
    }

    /// Inject a storage backend (any provider name other than `"local"`
    /// requires this).
    pub fn with_storage(mut self, storage: Arc<dyn StorageProvider>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Inject an event bus backend.
    pub fn with_event_bus(mut self, bus: Arc<dyn EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub async fn build(self) -> Result<VextirRuntime> {
        let config = self.config;

        let issues = config.validate();
        for issue in &issues {
            match issue.severity {
                ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
                ConfigSeverity::Error => tracing::error!("config: {issue}"),
            }
        }
        if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
            return Err(Error::Config(format!(
                "configuration has {} error(s)",
                issues
                    .iter()
                    .filter(|i| i.severity == ConfigSeverity::Error)
                    .count()
            )));
        }

        // ── Storage provider ─────────────────────────────────────────
        let storage: Arc<dyn StorageProvider> = match self.storage {
            Some(storage) => storage,
            None if config.storage_provider == "local" => match &config.storage_path {
                Some(path) => Arc::new(MemoryStorageProvider::with_path(path.clone())?),
                None => Arc::new(MemoryStorageProvider::new()),
            },
            None => {
                return Err(Error::InvalidInput(format!(
                    "no implementation for storage provider \"{}\" — inject one via the builder",
                    config.storage_provider
                )))
            }
        };

        // ── Event bus provider ───────────────────────────────────────
        let bus: Arc<dyn EventBus> = match self.bus {
            Some(bus) => bus,
            None if config.event_bus_provider == "local" => Arc::new(LocalEventBus::new(
                config.dedup.clone(),
                config.replay.clone(),
                config.bus.clone(),
            )),
            None => {
                return Err(Error::InvalidInput(format!(
                    "no implementation for event bus provider \"{}\" — inject one via the builder",
                    config.event_bus_provider
                )))
            }
        };

        // ── Resilience wrapping ──────────────────────────────────────
        let (storage, bus, health) = if config.resilience.enabled {
            let monitor = Arc::new(HealthMonitor::new(
                config.health.check_interval_seconds,
                config.resilience.breaker.clone(),
            ));
            let storage_breaker = monitor
                .register_provider("storage", Arc::new(StorageHealthAdapter(storage.clone())));
            let bus_breaker =
                monitor.register_provider("event_bus", Arc::new(BusHealthAdapter(bus.clone())));
            let storage: Arc<dyn StorageProvider> =
                Arc::new(ResilientStorage::new(storage, storage_breaker));
            let bus: Arc<dyn EventBus> = Arc::new(ResilientEventBus::new(bus, bus_breaker));
            monitor.start();
            (storage, bus, Some(monitor))
        } else {
            (storage, bus, None)
        };

        // ── Start the bus, attach registries & processor ─────────────
        bus.start().await?;

        let drivers = Arc::new(DriverRegistry::new());
        let tools = Arc::new(ToolRegistry::new());
        let models = Arc::new(ModelRegistry::with_storage(storage.clone()));

        let conversations = Arc::new(ConversationManager::new(config.conversation.clone()));
        conversations.start();

        let processor = Arc::new(UniversalProcessor::new(
            bus.clone(),
            drivers.clone(),
            conversations.clone(),
        ));
        processor.clone().attach().await?;

        let monitor = Arc::new(EventMonitor::new(bus.clone(), processor.clone()));

        tracing::info!(mode = %config.mode, "runtime initialized");
        Ok(VextirRuntime {
            config,
            storage,
            bus,
            drivers,
            tools,
            models,
            conversations,
            processor,
            monitor,
            health,
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Runtime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct VextirRuntime {
    config: RuntimeConfig,
    storage: Arc<dyn StorageProvider>,
    bus: Arc<dyn EventBus>,
    drivers: Arc<DriverRegistry>,
    tools: Arc<ToolRegistry>,
    models: Arc<ModelRegistry>,
    conversations: Arc<ConversationManager>,
    processor: Arc<UniversalProcessor>,
    monitor: Arc<EventMonitor>,
    health: Option<Arc<HealthMonitor>>,
}

impl std::fmt::Debug for VextirRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VextirRuntime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl VextirRuntime {
    /// Build a runtime with the bundled local providers.
    pub async fn initialize(config: RuntimeConfig) -> Result<Self> {
        RuntimeBuilder::new(config).build().await
    }

    pub fn builder(config: RuntimeConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageProvider> {
        &self.storage
    }

    pub fn event_bus(&self) -> &Arc<dyn EventBus> {
        &self.bus
    }

    pub fn drivers(&self) -> &Arc<DriverRegistry> {
        &self.drivers
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn conversations(&self) -> &Arc<ConversationManager> {
        &self.conversations
    }

    pub fn processor(&self) -> &Arc<UniversalProcessor> {
        &self.processor
    }

    pub fn monitor(&self) -> &Arc<EventMonitor> {
        &self.monitor
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Register a driver and initialize it immediately.
    pub async fn register_driver(&self, driver: Arc<dyn Driver>) -> Result<()> {
        self.drivers.register(driver)?;
        self.drivers.initialize_all().await
    }

    pub async fn publish_event(&self, event: EventMessage) -> Result<()> {
        self.bus.publish(event, None).await
    }

    pub async fn subscribe(
        &self,
        subject: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<String> {
        self.bus
            .subscribe(subject, handler, SubscribeOptions::default())
            .await
    }

    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.bus.unsubscribe(subscription_id).await
    }

    /// Publish an event and await the matching `<type>.response` event.
    ///
    /// Correlation is by `request_id` (one is stamped if missing).
    /// Returns `None` on timeout.
    pub async fn send_and_wait(
        &self,
        mut event: EventMessage,
        timeout: Duration,
    ) -> Result<Option<EventMessage>> {
        let request_id = match event.request_id() {
            Some(id) => id.to_owned(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                event = event.with_request_id(id.clone());
                id
            }
        };
        let response_type = format!("{}.response", event.event_type);

        let (tx, mut rx) = mpsc::channel::<EventMessage>(1);
        let handler = handler_fn(move |response| {
            let tx = tx.clone();
            async move {
                let _ = tx.try_send(response);
                Ok(())
            }
        });
        let subscription_id = self
            .bus
            .subscribe(
                &response_type,
                handler,
                SubscribeOptions::default().with_filter(
                    EventFilter::new()
                        .field("metadata.request_id", serde_json::json!(request_id)),
                ),
            )
            .await?;

        let publish_result = self.bus.publish(event, None).await;
        if let Err(e) = publish_result {
            self.bus.unsubscribe(&subscription_id).await.ok();
            return Err(e);
        }

        let response = tokio::time::timeout(timeout, rx.recv()).await.ok().flatten();
        self.bus.unsubscribe(&subscription_id).await.ok();
        Ok(response)
    }

    /// Combined provider health (empty when resilience is disabled).
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.health
            .as_ref()
            .map(|h| h.all_statuses())
            .unwrap_or_default()
    }

    /// Graceful shutdown: stop intake, drain handlers, stop background
    /// tasks.  Absorbs all errors except internal ones.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("runtime shutting down");

        if let Err(e) = self.processor.detach().await {
            absorb_or_raise(e, "detaching universal processor")?;
        }
        self.conversations.stop().await;
        self.drivers.shutdown_all().await;

        let dead_letters = self
            .bus
            .get_dead_letter_events(None)
            .await
            .map(|entries| entries.len())
            .unwrap_or(0);
        if dead_letters > 0 {
            tracing::warn!(dead_letters, "shutting down with unprocessed dead letters");
        }

        if let Err(e) = self.bus.stop().await {
            absorb_or_raise(e, "stopping event bus")?;
        }
        if let Some(health) = &self.health {
            health.stop().await;
        }
        tracing::info!("runtime shutdown complete");
        Ok(())
    }
}

fn absorb_or_raise(error: Error, context: &str) -> Result<()> {
    match error {
        Error::Internal(_) => {
            tracing::error!(error = %error, "{context} failed");
            Err(error)
        }
        other => {
            tracing::warn!(error = %other, "{context} failed (absorbed)");
            Ok(())
        }
    }
}
