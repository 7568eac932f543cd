//! Tool registry.
//!
//! Two views over the same specs: the planner view exposes only the
//! argument surface (id, name, parameter schema) so plan generation can
//! never see approval or sandbox policy; the runtime view carries the
//! full spec.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use vx_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Specs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who must approve an invocation of this tool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalPolicy {
    #[default]
    Auto,
    Manual,
    Guided,
}

/// Execution isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxPolicy {
    None,
    Restricted,
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the tool's parameters.
    pub parameters: Value,
    /// Capability tag linking the tool to the driver that executes it.
    pub capability: String,
    #[serde(default)]
    pub approval: ApprovalPolicy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<SandboxPolicy>,
}

/// The argument surface exposed to planners.
#[derive(Debug, Clone, Serialize)]
pub struct PlannerToolView {
    pub id: String,
    pub name: String,
    pub parameters: Value,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Arc<Vec<ToolSpec>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn snapshot(&self) -> Arc<Vec<ToolSpec>> {
        self.tools.read().clone()
    }

    pub fn register(&self, spec: ToolSpec) -> Result<()> {
        let mut tools = self.tools.write();
        if tools.iter().any(|t| t.id == spec.id) {
            return Err(Error::Conflict(format!("tool {} is already registered", spec.id)));
        }
        tracing::info!(tool_id = %spec.id, capability = %spec.capability, "tool registered");
        let mut next = tools.as_ref().clone();
        next.push(spec);
        *tools = Arc::new(next);
        Ok(())
    }

    pub fn unregister(&self, id: &str) {
        let mut tools = self.tools.write();
        let mut next = tools.as_ref().clone();
        next.retain(|t| t.id != id);
        *tools = Arc::new(next);
    }

    pub fn get(&self, id: &str) -> Option<ToolSpec> {
        self.snapshot().iter().find(|t| t.id == id).cloned()
    }

    pub fn list(&self) -> Vec<ToolSpec> {
        self.snapshot().as_ref().clone()
    }

    pub fn find_by_capability(&self, capability: &str) -> Vec<ToolSpec> {
        self.snapshot()
            .iter()
            .filter(|t| t.capability == capability)
            .cloned()
            .collect()
    }

    /// The restricted view handed to planners: argument surface only.
    pub fn planner_view(&self) -> Vec<PlannerToolView> {
        self.snapshot()
            .iter()
            .map(|t| PlannerToolView {
                id: t.id.clone(),
                name: t.name.clone(),
                parameters: t.parameters.clone(),
            })
            .collect()
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
    use serde_json::json;

    fn spec(id: &str, capability: &str) -> ToolSpec {
        ToolSpec {
            id: id.into(),
            name: format!("Tool {id}"),
            description: "a test tool".into(),
            parameters: json!({
                "type": "object",
                "properties": {"query": {"type": "string"}},
                "required": ["query"]
            }),
            capability: capability.into(),
            approval: ApprovalPolicy::Manual,
            sandbox: Some(SandboxPolicy::Restricted),
        }
    }

    #[test]
    fn register_lookup_and_capability_search() {
        let registry = ToolRegistry::new();
        registry.register(spec("search", "web.search")).unwrap();
        registry.register(spec("fetch", "web.fetch")).unwrap();
        registry.register(spec("fetch2", "web.fetch")).unwrap();

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get("search").unwrap().capability, "web.search");
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.find_by_capability("web.fetch").len(), 2);
    }

    #[test]
    fn duplicate_ids_conflict() {
        let registry = ToolRegistry::new();
        registry.register(spec("t1", "a.b")).unwrap();
        let err = registry.register(spec("t1", "a.b")).unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[test]
    fn planner_view_hides_policies() {
        let registry = ToolRegistry::new();
        registry.register(spec("t1", "a.b")).unwrap();

        let view = registry.planner_view();
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].id, "t1");
        // Serialized planner view must not leak approval/sandbox policy.
        let raw = serde_json::to_string(&view[0]).unwrap();
        assert!(!raw.contains("approval"));
        assert!(!raw.contains("sandbox"));
        assert!(raw.contains("parameters"));
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = ToolRegistry::new();
        registry.register(spec("t1", "a.b")).unwrap();
        registry.unregister("t1");
        registry.unregister("t1");
        assert!(registry.is_empty());
    }
}
