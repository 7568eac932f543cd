//! Canonical event envelope.
//!
//! Every event moving through the bus is an [`EventMessage`]: an immutable,
//! time-stamped, typed record with a schemaless payload and a metadata map
//! carrying the reserved routing keys (`session_id`, `correlation_id`,
//! `request_id`, `turn_number`).  The envelope also centralizes the codec
//! used for replay and dead-letter storage, and the deduplication key
//! derivation.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Priority
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Delivery priority.  Ordinal: `Low < Normal < High < Critical`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EventMessage
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The canonical event record.
///
/// Ids are UUIDv7 — time-ordered and lexicographically sortable — and are
/// never reused.  The envelope serializes to the wire shape accepted at
/// every edge: `{id, type, timestamp, source, user_id, data, metadata}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    #[serde(default = "fresh_id")]
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "EventPriority::is_normal")]
    pub priority: EventPriority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

fn default_source() -> String {
    "unknown".into()
}

fn fresh_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

impl EventPriority {
    fn is_normal(&self) -> bool {
        *self == EventPriority::Normal
    }
}

impl EventMessage {
    /// Create a new event with a fresh time-ordered id.
    ///
    /// A non-object `data` value is wrapped as `{"value": <data>}` so the
    /// payload is always a key/value map.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        let data = match data {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".into(), other);
                map
            }
        };
        Self {
            id: fresh_id(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: default_source(),
            user_id: String::new(),
            data,
            metadata: HashMap::new(),
            priority: EventPriority::Normal,
            ttl_seconds: None,
            idempotency_key: None,
        }
    }

    // ── Builder-style setters ────────────────────────────────────────

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn with_session_id(self, session_id: impl Into<String>) -> Self {
        self.with_metadata("session_id", Value::String(session_id.into()))
    }

    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        self.with_metadata("correlation_id", Value::String(correlation_id.into()))
    }

    pub fn with_request_id(self, request_id: impl Into<String>) -> Self {
        self.with_metadata("request_id", Value::String(request_id.into()))
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_ttl(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    // ── Typed metadata accessors ─────────────────────────────────────

    fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }

    pub fn session_id(&self) -> Option<&str> {
        self.metadata_str("session_id")
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata_str("correlation_id")
    }

    pub fn request_id(&self) -> Option<&str> {
        self.metadata_str("request_id")
    }

    pub fn turn_number(&self) -> Option<u32> {
        self.metadata
            .get("turn_number")
            .and_then(Value::as_u64)
            .map(|n| n as u32)
    }

    pub fn set_turn_number(&mut self, turn: u32) {
        self.metadata
            .insert("turn_number".into(), Value::from(turn));
    }

    /// Effective user id: the envelope field, falling back to
    /// `metadata.user_id` for events produced by older edges.
    pub fn effective_user_id(&self) -> &str {
        if !self.user_id.is_empty() {
            &self.user_id
        } else {
            self.metadata_str("user_id").unwrap_or("")
        }
    }

    // ── Lifecycle helpers ────────────────────────────────────────────

    /// Whether the event's TTL has elapsed at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => now > self.timestamp + Duration::seconds(ttl as i64),
            None => false,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    // ── Codec ────────────────────────────────────────────────────────

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an envelope from its wire form.
    ///
    /// Edges are allowed to carry `ttl_seconds`, `priority`, and
    /// `idempotency_key` inside `metadata`; those reserved keys are lifted
    /// into the typed fields here so the rest of the runtime never has to
    /// look in two places.
    pub fn from_json(raw: &str) -> Result<Self> {
        let mut event: EventMessage = serde_json::from_str(raw)?;
        event.lift_reserved_metadata();
        Ok(event)
    }

    fn lift_reserved_metadata(&mut self) {
        if self.ttl_seconds.is_none() {
            if let Some(ttl) = self.metadata.remove("ttl_seconds") {
                self.ttl_seconds = ttl.as_u64();
            }
        }
        if let Some(p) = self.metadata.remove("priority") {
            if let Ok(priority) = serde_json::from_value::<EventPriority>(p) {
                self.priority = priority;
            }
        }
        if self.idempotency_key.is_none() {
            if let Some(key) = self.metadata.remove("idempotency_key") {
                self.idempotency_key = key.as_str().map(str::to_owned);
            }
        }
    }

    // ── Deduplication ────────────────────────────────────────────────

    /// The key used by the bus dedup cache: the explicit idempotency key
    /// when present, otherwise a hash of the event type and canonicalized
    /// payload (sorted keys, no whitespace, UTF-8).
    pub fn dedup_key(&self) -> String {
        if let Some(key) = &self.idempotency_key {
            return key.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.event_type.as_bytes());
        hasher.update(b"\n");
        hasher.update(canonical_json(&Value::Object(self.data.clone())).as_bytes());
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(64);
        for byte in digest {
            use std::fmt::Write;
            let _ = write!(hex, "{byte:02x}");
        }
        hex
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Canonical JSON
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a JSON value with object keys sorted and no whitespace.
///
/// Used for the dedup hash: two payloads that differ only in key order
/// must produce the same bytes.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_default());
                out.push(':');
                if let Some(child) = map.get(*key) {
                    write_canonical(child, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => {
            out.push_str(&serde_json::to_string(scalar).unwrap_or_default());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ids_are_time_ordered() {
        let a = EventMessage::new("test.event", json!({}));
        // UUIDv7 ids order by their millisecond timestamp; step past it.
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = EventMessage::new("test.event", json!({}));
        assert_ne!(a.id, b.id);
        assert!(a.id < b.id);
    }

    #[test]
    fn round_trip_preserves_envelope() {
        let event = EventMessage::new("llm.chat", json!({"messages": [{"role": "user", "content": "Hello"}]}))
            .with_user_id("u1")
            .with_source("test")
            .with_session_id("s1")
            .with_request_id("r1")
            .with_ttl(30);

        let raw = event.to_json().unwrap();
        let parsed = EventMessage::from_json(&raw).unwrap();

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.event_type, "llm.chat");
        assert_eq!(parsed.user_id, "u1");
        assert_eq!(parsed.source, "test");
        assert_eq!(parsed.session_id(), Some("s1"));
        assert_eq!(parsed.request_id(), Some("r1"));
        assert_eq!(parsed.ttl_seconds, Some(30));
        assert_eq!(parsed.data, event.data);
    }

    #[test]
    fn reserved_metadata_is_lifted_on_parse() {
        let raw = r#"{
            "id": "e1",
            "type": "test.event",
            "timestamp": "2026-01-15T10:00:00Z",
            "data": {},
            "metadata": {"ttl_seconds": 60, "priority": "high", "idempotency_key": "op-1"}
        }"#;
        let event = EventMessage::from_json(raw).unwrap();
        assert_eq!(event.ttl_seconds, Some(60));
        assert_eq!(event.priority, EventPriority::High);
        assert_eq!(event.idempotency_key.as_deref(), Some("op-1"));
        assert!(!event.metadata.contains_key("ttl_seconds"));
    }

    #[test]
    fn canonical_json_is_key_order_independent() {
        let a = json!({"b": 1, "a": {"y": true, "x": [1, 2]}});
        let b = json!({"a": {"x": [1, 2], "y": true}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"x":[1,2],"y":true},"b":1}"#);
    }

    #[test]
    fn dedup_key_is_stable_across_key_order() {
        let mut e1 = EventMessage::new("test.event", json!({"value": 42, "message": "test"}));
        let mut e2 = EventMessage::new("test.event", json!({"message": "test", "value": 42}));
        // Ids differ but the dedup key must not depend on them.
        assert_ne!(e1.id, e2.id);
        assert_eq!(e1.dedup_key(), e2.dedup_key());

        // Different payload, different key.
        e2.data.insert("extra".into(), json!(1));
        assert_ne!(e1.dedup_key(), e2.dedup_key());

        // Explicit idempotency key wins over the hash.
        e1.idempotency_key = Some("op-123".into());
        assert_eq!(e1.dedup_key(), "op-123");
    }

    #[test]
    fn ttl_expiry() {
        let mut event = EventMessage::new("test.ttl", json!({})).with_ttl(1);
        assert!(!event.is_expired());
        event.timestamp = Utc::now() - Duration::seconds(2);
        assert!(event.is_expired());

        let no_ttl = EventMessage::new("test.ttl", json!({}));
        assert!(!no_ttl.is_expired());
    }

    #[test]
    fn turn_number_accessors() {
        let mut event = EventMessage::new("llm.chat", json!({}));
        assert_eq!(event.turn_number(), None);
        event.set_turn_number(3);
        assert_eq!(event.turn_number(), Some(3));
    }

    #[test]
    fn non_object_data_is_wrapped() {
        let event = EventMessage::new("test.event", json!("hello"));
        assert_eq!(event.data.get("value"), Some(&json!("hello")));
    }
}
