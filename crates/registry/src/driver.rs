//! The driver ABI: manifest, kinds, lifecycle status, and the
//! [`Driver`] trait every driver implements.

use serde::{Deserialize, Serialize};

use vx_domain::error::Result;
use vx_domain::event::EventMessage;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manifest
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// What kind of component a driver is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    Agent,
    Tool,
    Connector,
    Scheduler,
    Storage,
    Authenticator,
    Planner,
}

/// Resource budget for one driver invocation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub memory_mb: u32,
    pub timeout_seconds: u64,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            memory_mb: 256,
            timeout_seconds: 300,
        }
    }
}

/// Static description of a driver.
///
/// `capabilities` are dotted event-type prefixes (`llm.chat`,
/// `context.*` is expressed as the prefix `context`).  Routing prefers
/// the longest matching prefix, then the highest `priority`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverManifest {
    pub id: String,
    pub name: String,
    #[serde(default = "d_version")]
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub description: String,
    pub kind: DriverKind,
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub resources: ResourceSpec,
    /// Required drivers abort `initialize_all` on failure; optional ones
    /// are marked failed and skipped.
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub priority: i32,
}

fn d_version() -> String {
    "0.1.0".into()
}

impl DriverManifest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: DriverKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: d_version(),
            author: String::new(),
            description: String::new(),
            kind,
            capabilities: Vec::new(),
            resources: ResourceSpec::default(),
            required: false,
            priority: 0,
        }
    }

    pub fn with_capability(mut self, capability: impl Into<String>) -> Self {
        self.capabilities.push(capability.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resources(mut self, resources: ResourceSpec) -> Self {
        self.resources = resources;
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// The longest capability that is a dot-prefix of (or equal to)
    /// `event_type`, with its length in segments.
    pub fn best_capability_match(&self, event_type: &str) -> Option<(usize, &str)> {
        self.capabilities
            .iter()
            .filter(|cap| capability_matches(cap, event_type))
            .map(|cap| (cap.split('.').count(), cap.as_str()))
            .max_by_key(|(segments, _)| *segments)
    }
}

/// Whether `capability` covers `event_type`: exact match or dot-prefix
/// (`llm.chat` covers `llm.chat.tool` but not `llm.chatter`).
pub fn capability_matches(capability: &str, event_type: &str) -> bool {
    event_type == capability
        || (event_type.len() > capability.len()
            && event_type.starts_with(capability)
            && event_type.as_bytes()[capability.len()] == b'.')
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lifecycle & trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Driver instance state machine:
/// `Registered → Initialized → Running → Stopped | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriverStatus {
    Registered,
    Initialized,
    Running,
    Stopped,
    Failed,
}

impl std::fmt::Display for DriverStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DriverStatus::Registered => write!(f, "registered"),
            DriverStatus::Initialized => write!(f, "initialized"),
            DriverStatus::Running => write!(f, "running"),
            DriverStatus::Stopped => write!(f, "stopped"),
            DriverStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Trait every driver implements.
///
/// Drivers are shared (`Arc<dyn Driver>`), long-lived, and must be safe
/// for concurrent `handle` calls.  `handle` returns zero or more output
/// events which the universal processor publishes back onto the bus.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    fn manifest(&self) -> &DriverManifest;

    /// One-time setup before the first `handle` call.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: &EventMessage) -> Result<Vec<EventMessage>>;

    /// Cooperative teardown.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_prefix_matching() {
        assert!(capability_matches("llm.chat", "llm.chat"));
        assert!(capability_matches("llm.chat", "llm.chat.tool"));
        assert!(capability_matches("context", "context.read"));
        assert!(!capability_matches("llm.chat", "llm.chatter"));
        assert!(!capability_matches("llm.chat.tool", "llm.chat"));
    }

    #[test]
    fn best_match_prefers_longest_capability() {
        let manifest = DriverManifest::new("d1", "Driver", DriverKind::Agent)
            .with_capability("llm.chat")
            .with_capability("llm.chat.tool");
        let (segments, capability) = manifest.best_capability_match("llm.chat.tool.run").unwrap();
        assert_eq!(capability, "llm.chat.tool");
        assert_eq!(segments, 3);
        assert!(manifest.best_capability_match("time.cron").is_none());
    }
}
