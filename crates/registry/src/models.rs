//! Model registry and usage ledger.
//!
//! The catalog is seeded with a small set of common model ids and their
//! per-1k-token costs so the runtime can cost-account and pick models by
//! capability out of the box.  Usage is aggregated in-process keyed by
//! (user, model, day); when a storage provider is attached each record is
//! also appended to the `usage` container (`pk = user_id`).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::json;

use vx_domain::error::{Error, Result};
use vx_storage::{Document, StorageProvider};

pub const USAGE_CONTAINER: &str = "usage";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model spec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSpec {
    pub id: String,
    pub name: String,
    pub provider: String,
    pub endpoint: String,
    /// e.g. `chat`, `embeddings`, `tool-use`.
    pub capabilities: Vec<String>,
    pub cost_per_1k_input: f64,
    pub cost_per_1k_output: f64,
    pub context_window: u32,
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests_per_minute: Option<u32>,
}

impl ModelSpec {
    /// Combined input+output cost per 1k tokens; the ranking key for
    /// [`ModelRegistry::get_cheapest`].
    pub fn combined_cost_per_1k(&self) -> f64 {
        self.cost_per_1k_input + self.cost_per_1k_output
    }

    /// Cost of one request given its token counts.
    pub fn cost_for(&self, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        (prompt_tokens as f64 / 1000.0) * self.cost_per_1k_input
            + (completion_tokens as f64 / 1000.0) * self.cost_per_1k_output
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|c| c == capability)
    }
}

fn openai(
    id: &str,
    name: &str,
    capabilities: &[&str],
    cost_in: f64,
    cost_out: f64,
    context_window: u32,
    max_output: u32,
) -> ModelSpec {
    ModelSpec {
        id: id.into(),
        name: name.into(),
        provider: "openai".into(),
        endpoint: "https://api.openai.com/v1".into(),
        capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
        cost_per_1k_input: cost_in,
        cost_per_1k_output: cost_out,
        context_window,
        max_output_tokens: max_output,
        requests_per_minute: None,
    }
}

fn default_catalog() -> Vec<ModelSpec> {
    vec![
        openai("gpt-4o", "GPT-4o", &["chat", "tool-use", "vision"], 0.0025, 0.01, 128_000, 16_384),
        openai("gpt-4o-mini", "GPT-4o mini", &["chat", "tool-use"], 0.00015, 0.0006, 128_000, 16_384),
        openai("gpt-3.5-turbo", "GPT-3.5 Turbo", &["chat"], 0.0005, 0.0015, 16_385, 4_096),
        openai("o1-mini", "o1-mini", &["chat", "reasoning"], 0.003, 0.012, 128_000, 65_536),
        openai("o3-mini", "o3-mini", &["chat", "reasoning", "tool-use"], 0.0011, 0.0044, 200_000, 100_000),
        openai("text-embedding-3-small", "Text Embedding 3 Small", &["embeddings"], 0.00002, 0.0, 8_191, 0),
    ]
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Usage ledger
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model_id: String,
    pub user_id: String,
    pub timestamp: DateTime<Utc>,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost: f64,
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UsageStats {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub requests_by_model: HashMap<String, u64>,
    pub tokens_by_model: HashMap<String, u64>,
    pub cost_by_model: HashMap<String, f64>,
}

#[derive(Debug, Clone, Default)]
struct DayBucket {
    requests: u64,
    tokens: u64,
    cost: f64,
}

/// (user_id, model_id, YYYY-MM-DD)
type LedgerKey = (String, String, String);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ModelRegistry {
    models: RwLock<Arc<Vec<ModelSpec>>>,
    ledger: Mutex<HashMap<LedgerKey, DayBucket>>,
    storage: Option<Arc<dyn StorageProvider>>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Registry seeded with the default catalog, no persistence.
    pub fn new() -> Self {
        Self {
            models: RwLock::new(Arc::new(default_catalog())),
            ledger: Mutex::new(HashMap::new()),
            storage: None,
        }
    }

    /// Registry that additionally appends usage records to storage.
    pub fn with_storage(storage: Arc<dyn StorageProvider>) -> Self {
        Self {
            storage: Some(storage),
            ..Self::new()
        }
    }

    fn snapshot(&self) -> Arc<Vec<ModelSpec>> {
        self.models.read().clone()
    }

    /// Register or replace a model spec.
    pub fn register(&self, spec: ModelSpec) {
        let mut models = self.models.write();
        let mut next = models.as_ref().clone();
        next.retain(|m| m.id != spec.id);
        tracing::info!(model_id = %spec.id, provider = %spec.provider, "model registered");
        next.push(spec);
        *models = Arc::new(next);
    }

    pub fn get(&self, id: &str) -> Option<ModelSpec> {
        self.snapshot().iter().find(|m| m.id == id).cloned()
    }

    pub fn list(&self, provider: Option<&str>, capability: Option<&str>) -> Vec<ModelSpec> {
        self.snapshot()
            .iter()
            .filter(|m| provider.map(|p| m.provider == p).unwrap_or(true))
            .filter(|m| capability.map(|c| m.has_capability(c)).unwrap_or(true))
            .cloned()
            .collect()
    }

    /// Cheapest model advertising `capability`, by combined per-1k cost.
    pub fn get_cheapest(&self, capability: &str) -> Option<ModelSpec> {
        self.snapshot()
            .iter()
            .filter(|m| m.has_capability(capability))
            .min_by(|a, b| {
                a.combined_cost_per_1k()
                    .partial_cmp(&b.combined_cost_per_1k())
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .cloned()
    }

    /// Record one request in the ledger (and storage, when attached).
    pub async fn track_usage(&self, record: UsageRecord) -> Result<()> {
        if record.user_id.is_empty() {
            return Err(Error::InvalidInput("usage record requires a user_id".into()));
        }
        let day = record.timestamp.format("%Y-%m-%d").to_string();
        {
            let mut ledger = self.ledger.lock();
            let bucket = ledger
                .entry((record.user_id.clone(), record.model_id.clone(), day))
                .or_default();
            bucket.requests += 1;
            bucket.tokens += record.total_tokens as u64;
            bucket.cost += record.cost;
        }

        if let Some(storage) = &self.storage {
            storage
                .create_container_if_not_exists(USAGE_CONTAINER)
                .await?;
            let doc = Document::new(
                format!("{}-{}", record.request_id, uuid::Uuid::new_v4()),
                record.user_id.clone(),
            )
            .with_attribute("model_id", json!(record.model_id))
            .with_attribute("timestamp", json!(record.timestamp.to_rfc3339()))
            .with_attribute("prompt_tokens", json!(record.prompt_tokens))
            .with_attribute("completion_tokens", json!(record.completion_tokens))
            .with_attribute("total_tokens", json!(record.total_tokens))
            .with_attribute("cost", json!(record.cost))
            .with_attribute("request_id", json!(record.request_id));
            storage.create(USAGE_CONTAINER, doc).await?;
        }
        Ok(())
    }

    /// Aggregate usage, across everyone or for one user.
    pub fn get_usage_stats(&self, user_id: Option<&str>) -> UsageStats {
        let ledger = self.ledger.lock();
        let mut stats = UsageStats::default();
        for ((user, model, _day), bucket) in ledger.iter() {
            if user_id.map(|u| u == user).unwrap_or(true) {
                stats.total_requests += bucket.requests;
                stats.total_tokens += bucket.tokens;
                stats.total_cost += bucket.cost;
                *stats.requests_by_model.entry(model.clone()).or_default() += bucket.requests;
                *stats.tokens_by_model.entry(model.clone()).or_default() += bucket.tokens;
                *stats.cost_by_model.entry(model.clone()).or_default() += bucket.cost;
            }
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_is_seeded() {
        let registry = ModelRegistry::new();
        assert!(registry.get("gpt-4o").is_some());
        assert!(registry.get("gpt-4o-mini").is_some());
        assert!(registry.get("o1-mini").is_some());
        assert!(registry.get("o3-mini").is_some());
        assert!(registry.get("unknown-model").is_none());
    }

    #[test]
    fn list_filters_by_provider_and_capability() {
        let registry = ModelRegistry::new();
        let chat = registry.list(None, Some("chat"));
        assert!(!chat.is_empty());
        assert!(chat.iter().all(|m| m.has_capability("chat")));

        let openai_chat = registry.list(Some("openai"), Some("chat"));
        assert!(openai_chat
            .iter()
            .all(|m| m.provider == "openai" && m.has_capability("chat")));

        assert!(registry.list(Some("nonexistent"), None).is_empty());
    }

    #[test]
    fn cheapest_by_combined_cost() {
        let registry = ModelRegistry::new();
        let cheapest = registry.get_cheapest("chat").unwrap();
        let min = registry
            .list(None, Some("chat"))
            .iter()
            .map(|m| m.combined_cost_per_1k())
            .fold(f64::INFINITY, f64::min);
        assert_eq!(cheapest.combined_cost_per_1k(), min);
    }

    #[test]
    fn cost_calculation() {
        let registry = ModelRegistry::new();
        let model = registry.get("gpt-4o").unwrap();
        let cost = model.cost_for(1000, 500);
        assert!((cost - (0.0025 + 0.005)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn usage_tracking_aggregates_by_user_and_model() {
        let registry = ModelRegistry::new();
        registry
            .track_usage(UsageRecord {
                model_id: "gpt-4o".into(),
                user_id: "user1".into(),
                timestamp: Utc::now(),
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                cost: 0.001,
                request_id: "req1".into(),
            })
            .await
            .unwrap();
        registry
            .track_usage(UsageRecord {
                model_id: "gpt-4o-mini".into(),
                user_id: "user1".into(),
                timestamp: Utc::now(),
                prompt_tokens: 200,
                completion_tokens: 100,
                total_tokens: 300,
                cost: 0.0005,
                request_id: "req2".into(),
            })
            .await
            .unwrap();
        registry
            .track_usage(UsageRecord {
                model_id: "gpt-4o".into(),
                user_id: "user2".into(),
                timestamp: Utc::now(),
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
                cost: 0.0001,
                request_id: "req3".into(),
            })
            .await
            .unwrap();

        let user1 = registry.get_usage_stats(Some("user1"));
        assert_eq!(user1.total_requests, 2);
        assert_eq!(user1.total_tokens, 450);
        assert!((user1.total_cost - 0.0015).abs() < 1e-9);
        assert_eq!(user1.requests_by_model.get("gpt-4o"), Some(&1));
        assert_eq!(user1.requests_by_model.get("gpt-4o-mini"), Some(&1));

        let overall = registry.get_usage_stats(None);
        assert_eq!(overall.total_requests, 3);
        assert_eq!(overall.total_tokens, 465);
    }

    #[tokio::test]
    async fn usage_without_user_is_rejected() {
        let registry = ModelRegistry::new();
        let err = registry
            .track_usage(UsageRecord {
                model_id: "gpt-4o".into(),
                user_id: String::new(),
                timestamp: Utc::now(),
                prompt_tokens: 1,
                completion_tokens: 1,
                total_tokens: 2,
                cost: 0.0,
                request_id: "req".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn usage_persists_to_storage() {
        use vx_storage::{MemoryStorageProvider, QueryPredicate};

        let storage = Arc::new(MemoryStorageProvider::new());
        let registry = ModelRegistry::with_storage(storage.clone());
        registry
            .track_usage(UsageRecord {
                model_id: "gpt-4o".into(),
                user_id: "user1".into(),
                timestamp: Utc::now(),
                prompt_tokens: 100,
                completion_tokens: 50,
                total_tokens: 150,
                cost: 0.001,
                request_id: "req1".into(),
            })
            .await
            .unwrap();

        let docs = storage
            .query(USAGE_CONTAINER, QueryPredicate::all(), Some("user1"), None, None)
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].attribute_str("model_id"), Some("gpt-4o"));
        assert_eq!(docs[0].attribute_str("request_id"), Some("req1"));
    }

    #[test]
    fn register_replaces_existing_spec() {
        let registry = ModelRegistry::new();
        let mut custom = registry.get("gpt-4o").unwrap();
        custom.cost_per_1k_input = 99.0;
        registry.register(custom);
        assert_eq!(registry.get("gpt-4o").unwrap().cost_per_1k_input, 99.0);
        // No duplicate entries.
        assert_eq!(
            registry
                .list(None, None)
                .iter()
                .filter(|m| m.id == "gpt-4o")
                .count(),
            1
        );
    }
}
