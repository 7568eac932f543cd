//! Runtime configuration.
//!
//! [`RuntimeConfig`] enumerates everything the runtime factory needs to
//! compose a working process: execution mode, provider names, and the
//! tunables for deduplication, replay, resilience, and conversation
//! bounds.  Loadable from a TOML file with env-var overrides
//! (`LIGHTNING_MODE`, `LIGHTNING_STORAGE_PROVIDER`,
//! `LIGHTNING_EVENT_BUS_PROVIDER`, `LIGHTNING_STORAGE_PATH`).

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    /// Provider names.  Only `"local"` ships with the runtime; other names
    /// must be supplied through the runtime builder.
    #[serde(default = "d_local")]
    pub storage_provider: String,
    #[serde(default = "d_local")]
    pub event_bus_provider: String,
    #[serde(default = "d_local")]
    pub serverless_provider: String,
    #[serde(default = "d_local")]
    pub container_runtime: String,
    /// When set, the local storage provider persists containers under this
    /// directory.  Unset means pure in-memory.
    #[serde(default)]
    pub storage_path: Option<PathBuf>,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub replay: ReplayConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub bus: BusConfig,
    /// Cloud-mode resource placement; ignored in local mode.
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Execution mode for the runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    #[default]
    Local,
    Cloud,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Local => write!(f, "local"),
            ExecutionMode::Cloud => write!(f, "cloud"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Deduplication
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_300")]
    pub window_seconds: u64,
    #[serde(default = "d_10000")]
    pub max_cache_size: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_seconds: 300,
            max_cache_size: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Replay / history
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default = "d_10000")]
    pub max_history_size: usize,
    #[serde(default = "d_3600")]
    pub retention_seconds: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_history_size: 10_000,
            retention_seconds: 3600,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resilience
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub breaker: BreakerConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            breaker: BreakerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "d_5")]
    pub failure_threshold: u32,
    #[serde(default = "d_2")]
    pub success_threshold: u32,
    #[serde(default = "d_60s")]
    pub timeout_seconds: f64,
    #[serde(default = "d_3")]
    pub half_open_requests: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            timeout_seconds: 60.0,
            half_open_requests: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "d_10s")]
    pub check_interval_seconds: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_seconds: 10.0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "d_24")]
    pub max_session_age_hours: u64,
    #[serde(default = "d_100")]
    pub max_turns_per_session: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_session_age_hours: 24,
            max_turns_per_session: 100,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Event bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bounded delivery queue; publishers get an explicit error past this.
    #[serde(default = "d_1024")]
    pub delivery_queue_size: usize,
    /// Bounded per-subscription queue between the router and each
    /// subscription's dispatch task.
    #[serde(default = "d_256")]
    pub subscription_queue_size: usize,
    #[serde(default = "d_1000")]
    pub max_orphaned_events: usize,
    #[serde(default = "d_1000")]
    pub max_dead_letter_events: usize,
    #[serde(default = "d_86400")]
    pub dead_letter_ttl_seconds: u64,
    #[serde(default = "d_300")]
    pub handler_timeout_seconds: u64,
    #[serde(default = "d_30")]
    pub shutdown_drain_seconds: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            delivery_queue_size: 1024,
            subscription_queue_size: 256,
            max_orphaned_events: 1000,
            max_dead_letter_events: 1000,
            dead_letter_ttl_seconds: 86_400,
            handler_timeout_seconds: 300,
            shutdown_drain_seconds: 30,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Loading & validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl RuntimeConfig {
    /// Read the config from a TOML file, then apply env overrides.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(Error::Io)?;
        let mut config: RuntimeConfig =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("parsing {}: {e}", path.display())))?;
        config.apply_env();
        Ok(config)
    }

    /// Build the config purely from environment variables over defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(mode) = std::env::var("LIGHTNING_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "local" => self.mode = ExecutionMode::Local,
                "cloud" => self.mode = ExecutionMode::Cloud,
                other => {
                    tracing::warn!(mode = %other, "unknown LIGHTNING_MODE, keeping configured mode");
                }
            }
        }
        if let Ok(provider) = std::env::var("LIGHTNING_STORAGE_PROVIDER") {
            if !provider.is_empty() {
                self.storage_provider = provider;
            }
        }
        if let Ok(provider) = std::env::var("LIGHTNING_EVENT_BUS_PROVIDER") {
            if !provider.is_empty() {
                self.event_bus_provider = provider;
            }
        }
        if let Ok(path) = std::env::var("LIGHTNING_STORAGE_PATH") {
            if !path.is_empty() {
                self.storage_path = Some(PathBuf::from(path));
            }
        }
    }

    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.storage_provider.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "storage_provider".into(),
                message: "provider name must not be empty".into(),
            });
        }
        if self.event_bus_provider.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "event_bus_provider".into(),
                message: "provider name must not be empty".into(),
            });
        }
        if self.bus.delivery_queue_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "bus.delivery_queue_size".into(),
                message: "delivery queue must hold at least one event".into(),
            });
        }
        if self.bus.subscription_queue_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "bus.subscription_queue_size".into(),
                message: "subscription queues must hold at least one event".into(),
            });
        }
        if self.dedup.enabled && self.dedup.max_cache_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "dedup.max_cache_size".into(),
                message: "dedup cache size must be non-zero when dedup is enabled".into(),
            });
        }
        if self.resilience.breaker.failure_threshold == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "resilience.breaker.failure_threshold".into(),
                message: "failure threshold must be at least 1".into(),
            });
        }
        if self.conversation.max_turns_per_session == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "conversation.max_turns_per_session".into(),
                message: "sessions must keep at least one turn".into(),
            });
        }
        if self.mode == ExecutionMode::Cloud && self.region.is_none() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "region".into(),
                message: "cloud mode without a region relies on provider defaults".into(),
            });
        }

        issues
    }
}

// ── Serde default helpers ────────────────────────────────────────────

fn d_local() -> String {
    "local".into()
}
fn d_true() -> bool {
    true
}
fn d_2() -> u32 {
    2
}
fn d_3() -> u32 {
    3
}
fn d_5() -> u32 {
    5
}
fn d_256() -> usize {
    256
}
fn d_24() -> u64 {
    24
}
fn d_30() -> u64 {
    30
}
fn d_100() -> usize {
    100
}
fn d_300() -> u64 {
    300
}
fn d_1000() -> usize {
    1000
}
fn d_1024() -> usize {
    1024
}
fn d_3600() -> u64 {
    3600
}
fn d_10000() -> usize {
    10_000
}
fn d_86400() -> u64 {
    86_400
}
fn d_10s() -> f64 {
    10.0
}
fn d_60s() -> f64 {
    60.0
}
