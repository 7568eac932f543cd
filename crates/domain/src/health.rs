//! Provider health reporting types.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Coarse provider health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Result of a single provider `health_check()` probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub details: HashMap<String, Value>,
}

impl HealthCheckResult {
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms,
            error: None,
            details: HashMap::new(),
        }
    }

    pub fn degraded(latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Degraded,
            latency_ms,
            error: Some(error.into()),
            details: HashMap::new(),
        }
    }

    pub fn unhealthy(latency_ms: f64, error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            latency_ms,
            error: Some(error.into()),
            details: HashMap::new(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }
}
