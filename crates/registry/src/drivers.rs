//! Driver registry.
//!
//! Holds registered driver instances plus their lifecycle status, and
//! routes events to drivers by capability prefix.  Reads work on
//! copy-on-write snapshots; registration swaps the snapshot under a
//! short write lock.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use vx_domain::error::{Error, Result};

use crate::driver::{Driver, DriverKind, DriverManifest, DriverStatus};

struct Entry {
    driver: Arc<dyn Driver>,
    status: Mutex<DriverStatus>,
    last_error: Mutex<Option<String>>,
}

/// Summary row returned by [`DriverRegistry::list`].
#[derive(Debug, Clone, Serialize)]
pub struct DriverInfo {
    pub id: String,
    pub name: String,
    pub kind: DriverKind,
    pub capabilities: Vec<String>,
    pub status: DriverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Default)]
pub struct DriverRegistry {
    // Registration order doubles as initialization (dependency) order.
    entries: RwLock<Arc<Vec<Arc<Entry>>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Entry>>> {
        self.entries.read().clone()
    }

    /// Register a driver instance.  Duplicate ids conflict.
    pub fn register(&self, driver: Arc<dyn Driver>) -> Result<()> {
        let id = driver.manifest().id.clone();
        let mut entries = self.entries.write();
        if entries.iter().any(|e| e.driver.manifest().id == id) {
            return Err(Error::Conflict(format!("driver {id} is already registered")));
        }
        tracing::info!(
            driver_id = %id,
            kind = ?driver.manifest().kind,
            capabilities = ?driver.manifest().capabilities,
            "driver registered"
        );
        let mut next = entries.as_ref().clone();
        next.push(Arc::new(Entry {
            driver,
            status: Mutex::new(DriverStatus::Registered),
            last_error: Mutex::new(None),
        }));
        *entries = Arc::new(next);
        Ok(())
    }

    /// Remove a driver.  Idempotent.
    pub fn unregister(&self, id: &str) {
        let mut entries = self.entries.write();
        let mut next = entries.as_ref().clone();
        next.retain(|e| e.driver.manifest().id != id);
        *entries = Arc::new(next);
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Driver>> {
        self.snapshot()
            .iter()
            .find(|e| e.driver.manifest().id == id)
            .map(|e| e.driver.clone())
    }

    pub fn status(&self, id: &str) -> Option<DriverStatus> {
        self.snapshot()
            .iter()
            .find(|e| e.driver.manifest().id == id)
            .map(|e| *e.status.lock())
    }

    pub fn list(&self, kind: Option<DriverKind>) -> Vec<DriverInfo> {
        self.snapshot()
            .iter()
            .filter(|e| kind.map(|k| e.driver.manifest().kind == k).unwrap_or(true))
            .map(|e| {
                let manifest = e.driver.manifest();
                DriverInfo {
                    id: manifest.id.clone(),
                    name: manifest.name.clone(),
                    kind: manifest.kind,
                    capabilities: manifest.capabilities.clone(),
                    status: *e.status.lock(),
                    last_error: e.last_error.lock().clone(),
                }
            })
            .collect()
    }

    /// Drivers whose capability set covers `event_type`, ordered by
    /// longest capability match first, then manifest priority (highest
    /// first), then id for determinism.  Failed and stopped drivers are
    /// excluded.
    pub fn route(&self, event_type: &str) -> Vec<Arc<dyn Driver>> {
        let mut hits: Vec<(usize, i32, String, Arc<dyn Driver>)> = self
            .snapshot()
            .iter()
            .filter(|e| {
                !matches!(
                    *e.status.lock(),
                    DriverStatus::Failed | DriverStatus::Stopped
                )
            })
            .filter_map(|e| {
                let manifest = e.driver.manifest();
                manifest.best_capability_match(event_type).map(|(len, _)| {
                    (len, manifest.priority, manifest.id.clone(), e.driver.clone())
                })
            })
            .collect();
        hits.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });
        hits.into_iter().map(|(_, _, _, driver)| driver).collect()
    }

    /// Whether any routable driver covers `event_type`.
    pub fn has_route(&self, event_type: &str) -> bool {
        !self.route(event_type).is_empty()
    }

    /// Initialize every registered driver in registration order.
    ///
    /// Optional drivers that fail are marked `Failed` (with the error
    /// recorded) and skipped; a required driver failure aborts the sweep.
    pub async fn initialize_all(&self) -> Result<()> {
        let entries = self.snapshot();
        for entry in entries.iter() {
            let manifest = entry.driver.manifest();
            if *entry.status.lock() != DriverStatus::Registered {
                continue;
            }
            match entry.driver.initialize().await {
                Ok(()) => {
                    *entry.status.lock() = DriverStatus::Running;
                    tracing::info!(driver_id = %manifest.id, "driver initialized");
                }
                Err(e) => {
                    *entry.status.lock() = DriverStatus::Failed;
                    *entry.last_error.lock() = Some(e.to_string());
                    if manifest.required {
                        tracing::error!(driver_id = %manifest.id, error = %e, "required driver failed to initialize");
                        return Err(e);
                    }
                    tracing::warn!(driver_id = %manifest.id, error = %e, "driver failed to initialize, skipping");
                }
            }
        }
        Ok(())
    }

    /// Shut down every running driver.  Errors are recorded, not raised.
    pub async fn shutdown_all(&self) {
        let entries = self.snapshot();
        for entry in entries.iter() {
            let status = *entry.status.lock();
            if !matches!(status, DriverStatus::Running | DriverStatus::Initialized) {
                continue;
            }
            let manifest = entry.driver.manifest();
            match entry.driver.shutdown().await {
                Ok(()) => {
                    *entry.status.lock() = DriverStatus::Stopped;
                }
                Err(e) => {
                    *entry.status.lock() = DriverStatus::Failed;
                    *entry.last_error.lock() = Some(e.to_string());
                    tracing::warn!(driver_id = %manifest.id, error = %e, "driver shutdown failed");
                }
            }
        }
    }

    /// Record a handler failure against a driver (shown in `list`).
    pub fn record_failure(&self, id: &str, error: &str) {
        if let Some(entry) = self
            .snapshot()
            .iter()
            .find(|e| e.driver.manifest().id == id)
        {
            *entry.last_error.lock() = Some(error.to_owned());
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::event::EventMessage;

    struct StubDriver {
        manifest: DriverManifest,
        fail_init: bool,
    }

    #[async_trait::async_trait]
    impl Driver for StubDriver {
        fn manifest(&self) -> &DriverManifest {
            &self.manifest
        }

        async fn initialize(&self) -> Result<()> {
            if self.fail_init {
                Err(Error::Internal("init failed".into()))
            } else {
                Ok(())
            }
        }

        async fn handle(&self, _event: &EventMessage) -> Result<Vec<EventMessage>> {
            Ok(Vec::new())
        }
    }

    fn stub(id: &str, capabilities: &[&str]) -> Arc<dyn Driver> {
        let mut manifest = DriverManifest::new(id, id, DriverKind::Agent);
        for cap in capabilities {
            manifest = manifest.with_capability(*cap);
        }
        Arc::new(StubDriver {
            manifest,
            fail_init: false,
        })
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let registry = DriverRegistry::new();
        registry.register(stub("d1", &["llm.chat"])).unwrap();
        let err = registry.register(stub("d1", &["llm.chat"])).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn route_longest_prefix_first() {
        let registry = DriverRegistry::new();
        registry.register(stub("generic", &["llm.chat"])).unwrap();
        registry
            .register(stub("specific", &["llm.chat.tool"]))
            .unwrap();

        let routed = registry.route("llm.chat.tool");
        let ids: Vec<&str> = routed.iter().map(|d| d.manifest().id.as_str()).collect();
        assert_eq!(ids, vec!["specific", "generic"]);

        // Only the generic driver covers the bare type.
        let routed = registry.route("llm.chat");
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].manifest().id, "generic");

        assert!(registry.route("time.cron").is_empty());
        assert!(!registry.has_route("time.cron"));
    }

    #[test]
    fn route_breaks_ties_by_priority() {
        let registry = DriverRegistry::new();
        let low = DriverManifest::new("low", "low", DriverKind::Agent)
            .with_capability("plan.schedule");
        let high = DriverManifest::new("high", "high", DriverKind::Scheduler)
            .with_capability("plan.schedule")
            .with_priority(10);
        registry
            .register(Arc::new(StubDriver {
                manifest: low,
                fail_init: false,
            }))
            .unwrap();
        registry
            .register(Arc::new(StubDriver {
                manifest: high,
                fail_init: false,
            }))
            .unwrap();

        let routed = registry.route("plan.schedule");
        assert_eq!(routed[0].manifest().id, "high");
    }

    #[tokio::test]
    async fn initialize_all_skips_optional_failures() {
        let registry = DriverRegistry::new();
        registry.register(stub("ok", &["a.b"])).unwrap();
        registry
            .register(Arc::new(StubDriver {
                manifest: DriverManifest::new("bad", "bad", DriverKind::Tool)
                    .with_capability("c.d"),
                fail_init: true,
            }))
            .unwrap();

        registry.initialize_all().await.unwrap();
        assert_eq!(registry.status("ok"), Some(DriverStatus::Running));
        assert_eq!(registry.status("bad"), Some(DriverStatus::Failed));

        // Failed drivers are not routable.
        assert!(registry.route("c.d.e").is_empty());
    }

    #[tokio::test]
    async fn required_driver_failure_aborts() {
        let registry = DriverRegistry::new();
        registry
            .register(Arc::new(StubDriver {
                manifest: DriverManifest::new("critical", "critical", DriverKind::Storage)
                    .with_capability("store")
                    .required(),
                fail_init: true,
            }))
            .unwrap();
        assert!(registry.initialize_all().await.is_err());
    }

    #[tokio::test]
    async fn shutdown_transitions_to_stopped() {
        let registry = DriverRegistry::new();
        registry.register(stub("d1", &["a.b"])).unwrap();
        registry.initialize_all().await.unwrap();
        registry.shutdown_all().await;
        assert_eq!(registry.status("d1"), Some(DriverStatus::Stopped));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = DriverRegistry::new();
        registry.register(stub("d1", &["a.b"])).unwrap();
        registry.unregister("d1");
        registry.unregister("d1");
        assert!(registry.is_empty());
    }
}
