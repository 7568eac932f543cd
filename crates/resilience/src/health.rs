//! Provider health monitor.
//!
//! Providers register by name; a background loop polls each one's
//! `health_check()` on the configured interval.  Every poll updates the
//! provider's health record and feeds its circuit breaker — an unhealthy
//! poll counts as a breaker failure, so calls fail fast before the next
//! poll even runs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use vx_domain::config::BreakerConfig;
use vx_domain::error::Result;
use vx_domain::health::{HealthCheckResult, HealthStatus};

use crate::breaker::{BreakerSnapshot, CircuitBreaker};

/// Anything the monitor can poll.
#[async_trait::async_trait]
pub trait HealthCheckable: Send + Sync {
    async fn health_check(&self) -> Result<HealthCheckResult>;
}

/// Latest poll outcome for one provider.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub latency_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub last_checked: DateTime<Utc>,
    /// Exponentially-smoothed health score (0–100).
    pub score: f64,
}

/// Combined health + breaker view returned by status queries.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStatus {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
    pub breaker: BreakerSnapshot,
}

struct ProviderEntry {
    provider: Arc<dyn HealthCheckable>,
    breaker: Arc<CircuitBreaker>,
    record: Arc<Mutex<Option<HealthRecord>>>,
}

pub struct HealthMonitor {
    check_interval: Duration,
    breaker_config: BreakerConfig,
    providers: Arc<RwLock<HashMap<String, ProviderEntry>>>,
    task: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl HealthMonitor {
    pub fn new(check_interval_seconds: f64, breaker_config: BreakerConfig) -> Self {
        Self {
            check_interval: Duration::from_secs_f64(check_interval_seconds.max(0.01)),
            breaker_config,
            providers: Arc::new(RwLock::new(HashMap::new())),
            task: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Register a provider.  Returns the provider's breaker so callers
    /// can route their own calls through it.
    pub fn register_provider(
        &self,
        name: impl Into<String>,
        provider: Arc<dyn HealthCheckable>,
    ) -> Arc<CircuitBreaker> {
        let name = name.into();
        let breaker = Arc::new(CircuitBreaker::new(name.clone(), self.breaker_config.clone()));
        self.providers.write().insert(
            name.clone(),
            ProviderEntry {
                provider,
                breaker: breaker.clone(),
                record: Arc::new(Mutex::new(None)),
            },
        );
        tracing::info!(provider = %name, "provider registered with health monitor");
        breaker
    }

    /// Start the poll loop.  Idempotent.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let providers = self.providers.clone();
        let interval = self.check_interval;
        let cancel = self.cancel.clone();
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => poll_all(&providers, interval).await,
                    _ = cancel.cancelled() => break,
                }
            }
        }));
        tracing::info!(interval_secs = interval.as_secs_f64(), "health monitor started");
    }

    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
        tracing::info!("health monitor stopped");
    }

    /// Run one poll cycle immediately (also used by tests).
    pub async fn poll_once(&self) {
        poll_all(&self.providers, self.check_interval).await;
    }

    pub fn get_provider_status(&self, name: &str) -> Option<ProviderStatus> {
        let providers = self.providers.read();
        let entry = providers.get(name)?;
        let status = ProviderStatus {
            name: name.to_owned(),
            health: entry.record.lock().clone(),
            breaker: entry.breaker.snapshot(),
        };
        Some(status)
    }

    pub fn all_statuses(&self) -> Vec<ProviderStatus> {
        let providers = self.providers.read();
        let mut statuses: Vec<ProviderStatus> = providers
            .iter()
            .map(|(name, entry)| ProviderStatus {
                name: name.clone(),
                health: entry.record.lock().clone(),
                breaker: entry.breaker.snapshot(),
            })
            .collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    pub fn provider_count(&self) -> usize {
        self.providers.read().len()
    }
}

async fn poll_all(providers: &RwLock<HashMap<String, ProviderEntry>>, budget: Duration) {
    // Snapshot entries so the lock is not held across polls.
    let entries: Vec<(String, Arc<dyn HealthCheckable>, Arc<CircuitBreaker>, Arc<Mutex<Option<HealthRecord>>>)> = {
        providers
            .read()
            .iter()
            .map(|(name, e)| {
                (
                    name.clone(),
                    e.provider.clone(),
                    e.breaker.clone(),
                    e.record.clone(),
                )
            })
            .collect()
    };

    for (name, provider, breaker, record) in entries {
        let result = tokio::time::timeout(budget, provider.health_check()).await;
        let check = match result {
            Ok(Ok(check)) => check,
            Ok(Err(e)) => HealthCheckResult::unhealthy(budget.as_secs_f64() * 1000.0, e.to_string()),
            Err(_) => HealthCheckResult::unhealthy(
                budget.as_secs_f64() * 1000.0,
                "health check timed out",
            ),
        };

        match check.status {
            HealthStatus::Healthy | HealthStatus::Degraded => breaker.record_success(),
            HealthStatus::Unhealthy => breaker.record_failure(),
        }

        let mut slot = record.lock();
        let previous_score = slot.as_ref().map(|r| r.score).unwrap_or(100.0);
        let sample = match check.status {
            HealthStatus::Healthy => 100.0,
            HealthStatus::Degraded => 50.0,
            HealthStatus::Unhealthy => 0.0,
        };
        let score = previous_score * 0.7 + sample * 0.3;
        if check.status != HealthStatus::Healthy {
            tracing::warn!(provider = %name, status = %check.status, error = ?check.error, "provider health degraded");
        }
        *slot = Some(HealthRecord {
            status: check.status,
            latency_ms: check.latency_ms,
            error: check.error,
            last_checked: Utc::now(),
            score,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vx_domain::error::Error;

    struct HealthyProvider;

    #[async_trait::async_trait]
    impl HealthCheckable for HealthyProvider {
        async fn health_check(&self) -> Result<HealthCheckResult> {
            Ok(HealthCheckResult::healthy(10.5))
        }
    }

    struct UnhealthyProvider;

    #[async_trait::async_trait]
    impl HealthCheckable for UnhealthyProvider {
        async fn health_check(&self) -> Result<HealthCheckResult> {
            Ok(HealthCheckResult::unhealthy(100.0, "connection failed"))
        }
    }

    struct ErroringProvider;

    #[async_trait::async_trait]
    impl HealthCheckable for ErroringProvider {
        async fn health_check(&self) -> Result<HealthCheckResult> {
            Err(Error::Http("refused".into()))
        }
    }

    #[tokio::test]
    async fn poll_updates_records_and_breakers() {
        let monitor = HealthMonitor::new(0.1, BreakerConfig::default());
        monitor.register_provider("healthy", Arc::new(HealthyProvider));
        monitor.register_provider("unhealthy", Arc::new(UnhealthyProvider));

        monitor.start();
        tokio::time::sleep(Duration::from_millis(250)).await;

        let healthy = monitor.get_provider_status("healthy").unwrap();
        let record = healthy.health.unwrap();
        assert_eq!(record.status, HealthStatus::Healthy);
        assert!((record.latency_ms - 10.5).abs() < f64::EPSILON);
        assert_eq!(healthy.breaker.state, crate::breaker::CircuitState::Closed);

        let unhealthy = monitor.get_provider_status("unhealthy").unwrap();
        let record = unhealthy.health.unwrap();
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert_eq!(record.error.as_deref(), Some("connection failed"));

        monitor.stop().await;
    }

    #[tokio::test]
    async fn repeated_unhealthy_polls_open_the_breaker() {
        let monitor = HealthMonitor::new(
            10.0,
            BreakerConfig {
                failure_threshold: 2,
                ..Default::default()
            },
        );
        monitor.register_provider("bad", Arc::new(UnhealthyProvider));

        monitor.poll_once().await;
        monitor.poll_once().await;

        let status = monitor.get_provider_status("bad").unwrap();
        assert!(!status.breaker.is_operational);
        // Score decays towards zero.
        assert!(status.health.unwrap().score < 100.0);
    }

    #[tokio::test]
    async fn erroring_health_check_counts_as_unhealthy() {
        let monitor = HealthMonitor::new(10.0, BreakerConfig::default());
        monitor.register_provider("erroring", Arc::new(ErroringProvider));
        monitor.poll_once().await;

        let status = monitor.get_provider_status("erroring").unwrap();
        let record = status.health.unwrap();
        assert_eq!(record.status, HealthStatus::Unhealthy);
        assert!(record.error.unwrap().contains("refused"));
    }

    #[tokio::test]
    async fn unknown_provider_is_none() {
        let monitor = HealthMonitor::new(10.0, BreakerConfig::default());
        assert!(monitor.get_provider_status("missing").is_none());
        assert_eq!(monitor.provider_count(), 0);
    }
}
