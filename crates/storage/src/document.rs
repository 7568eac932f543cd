//! Document model and query predicates.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Document
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A stored document: id + partition key + attribute map.
///
/// `version` drives optimistic concurrency: pass the version you read and
/// `update` will reject the write with a conflict if someone got there
/// first.  Leave it `None` to overwrite unconditionally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub partition_key: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl Document {
    pub fn new(id: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            partition_key: partition_key.into(),
            attributes: Map::new(),
            version: None,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Read an attribute by dotted path (`"schedule.cron"`).
    pub fn attribute(&self, path: &str) -> Option<&Value> {
        let mut current: &Value = self.attributes.get(path.split('.').next()?)?;
        for segment in path.split('.').skip(1) {
            current = current.get(segment)?;
        }
        Some(current)
    }

    pub fn attribute_str(&self, path: &str) -> Option<&str> {
        self.attribute(path).and_then(Value::as_str)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Query predicates
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conjunctive predicate over dotted attribute paths.
///
/// Only equality and prefix matching are supported — richer queries are a
/// backend concern, not part of the storage contract.
#[derive(Debug, Clone, Default)]
pub struct QueryPredicate {
    conditions: Vec<Condition>,
}

#[derive(Debug, Clone)]
enum Condition {
    Eq { path: String, value: Value },
    StartsWith { path: String, prefix: String },
    LessOrEqual { path: String, value: Value },
}

impl QueryPredicate {
    /// Predicate that matches every document.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(mut self, path: impl Into<String>, value: Value) -> Self {
        self.conditions.push(Condition::Eq {
            path: path.into(),
            value,
        });
        self
    }

    pub fn starts_with(mut self, path: impl Into<String>, prefix: impl Into<String>) -> Self {
        self.conditions.push(Condition::StartsWith {
            path: path.into(),
            prefix: prefix.into(),
        });
        self
    }

    /// String/number `<=` comparison; strings compare lexicographically
    /// (ISO-8601 timestamps order correctly this way).
    pub fn less_or_equal(mut self, path: impl Into<String>, value: Value) -> Self {
        self.conditions.push(Condition::LessOrEqual {
            path: path.into(),
            value,
        });
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|cond| match cond {
            Condition::Eq { path, value } => doc.attribute(path) == Some(value),
            Condition::StartsWith { path, prefix } => doc
                .attribute_str(path)
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
            Condition::LessOrEqual { path, value } => match (doc.attribute(path), value) {
                (Some(Value::String(a)), Value::String(b)) => a <= b,
                (Some(Value::Number(a)), Value::Number(b)) => {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a <= b,
                        _ => false,
                    }
                }
                _ => false,
            },
        })
    }
}

/// Sort order for query results.
#[derive(Debug, Clone)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc() -> Document {
        Document::new("d1", "u1")
            .with_attribute("status", json!("due"))
            .with_attribute("run_at", json!("2026-01-15T10:00:00Z"))
            .with_attribute("nested", json!({"kind": "cron"}))
    }

    #[test]
    fn eq_and_prefix_conditions() {
        let d = doc();
        assert!(QueryPredicate::all().matches(&d));
        assert!(QueryPredicate::all().eq("status", json!("due")).matches(&d));
        assert!(!QueryPredicate::all().eq("status", json!("done")).matches(&d));
        assert!(QueryPredicate::all()
            .starts_with("run_at", "2026-01")
            .matches(&d));
        assert!(QueryPredicate::all()
            .eq("nested.kind", json!("cron"))
            .matches(&d));
    }

    #[test]
    fn less_or_equal_on_timestamps() {
        let d = doc();
        assert!(QueryPredicate::all()
            .less_or_equal("run_at", json!("2026-01-16T00:00:00Z"))
            .matches(&d));
        assert!(!QueryPredicate::all()
            .less_or_equal("run_at", json!("2026-01-01T00:00:00Z"))
            .matches(&d));
    }

    #[test]
    fn missing_path_never_matches() {
        let d = doc();
        assert!(!QueryPredicate::all().eq("missing", json!(1)).matches(&d));
        assert!(!QueryPredicate::all()
            .starts_with("missing", "x")
            .matches(&d));
    }
}
