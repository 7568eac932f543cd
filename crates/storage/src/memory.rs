//! In-process storage provider.
//!
//! Pure in-memory by default.  When constructed with a base path, each
//! container is additionally flushed to `<path>/<container>.json` after
//! every mutation and loaded back at startup, which is enough durability
//! for local development.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use parking_lot::RwLock;
use serde_json::json;

use vx_domain::error::{Error, Result};
use vx_domain::health::HealthCheckResult;

use crate::document::{Document, OrderBy, QueryPredicate};
use crate::provider::StorageProvider;

/// container → partition_key → id → document
type Containers = HashMap<String, HashMap<String, HashMap<String, Document>>>;

pub struct MemoryStorageProvider {
    containers: RwLock<Containers>,
    base_path: Option<PathBuf>,
}

impl Default for MemoryStorageProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorageProvider {
    /// Pure in-memory provider.
    pub fn new() -> Self {
        Self {
            containers: RwLock::new(HashMap::new()),
            base_path: None,
        }
    }

    /// Provider with file durability under `base_path`.
    ///
    /// Existing container files are loaded eagerly; unreadable files are
    /// skipped with a warning rather than failing startup.
    pub fn with_path(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(Error::Io)?;

        let mut containers: Containers = HashMap::new();
        for entry in std::fs::read_dir(&base_path).map_err(Error::Io)? {
            let entry = entry.map_err(Error::Io)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match std::fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str::<Vec<Document>>(&raw) {
                    Ok(docs) => {
                        let container = containers.entry(name.to_owned()).or_default();
                        for doc in docs {
                            container
                                .entry(doc.partition_key.clone())
                                .or_default()
                                .insert(doc.id.clone(), doc);
                        }
                    }
                    Err(e) => {
                        tracing::warn!(container = %name, error = %e, "skipping unreadable container file");
                    }
                },
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "skipping unreadable container file");
                }
            }
        }

        let loaded: usize = containers.values().map(|c| c.len()).sum();
        tracing::info!(
            containers = containers.len(),
            partitions = loaded,
            path = %base_path.display(),
            "storage loaded from disk"
        );

        Ok(Self {
            containers: RwLock::new(containers),
            base_path: Some(base_path),
        })
    }

    /// Write one container back to its file.  Caller holds no lock.
    fn flush_container(&self, name: &str) -> Result<()> {
        let Some(base) = &self.base_path else {
            return Ok(());
        };
        let docs: Vec<Document> = {
            let containers = self.containers.read();
            containers
                .get(name)
                .map(|parts| parts.values().flat_map(|m| m.values().cloned()).collect())
                .unwrap_or_default()
        };
        let raw = serde_json::to_string_pretty(&docs)?;
        std::fs::write(base.join(format!("{name}.json")), raw).map_err(Error::Io)?;
        Ok(())
    }

    fn document_count(&self) -> usize {
        self.containers
            .read()
            .values()
            .flat_map(|parts| parts.values())
            .map(|m| m.len())
            .sum()
    }
}

#[async_trait::async_trait]
impl StorageProvider for MemoryStorageProvider {
    async fn create_container_if_not_exists(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::InvalidInput("container name must not be empty".into()));
        }
        self.containers
            .write()
            .entry(name.to_owned())
            .or_default();
        Ok(())
    }

    async fn get(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<Option<Document>> {
        let containers = self.containers.read();
        let Some(parts) = containers.get(container) else {
            return Ok(None);
        };
        match partition_key {
            Some(pk) => Ok(parts.get(pk).and_then(|m| m.get(id)).cloned()),
            None => Ok(parts.values().find_map(|m| m.get(id)).cloned()),
        }
    }

    async fn create(&self, container: &str, mut doc: Document) -> Result<Document> {
        if doc.id.is_empty() {
            return Err(Error::InvalidInput("document id must not be empty".into()));
        }
        let mut containers = self.containers.write();
        let parts = containers.entry(container.to_owned()).or_default();
        let partition = parts.entry(doc.partition_key.clone()).or_default();
        if partition.contains_key(&doc.id) {
            return Err(Error::Conflict(format!(
                "document {}/{} already exists in {container}",
                doc.partition_key, doc.id
            )));
        }
        doc.version = Some(1);
        partition.insert(doc.id.clone(), doc.clone());
        drop(containers);
        self.flush_container(container)?;
        Ok(doc)
    }

    async fn update(&self, container: &str, mut doc: Document) -> Result<Document> {
        let mut containers = self.containers.write();
        let partition = containers
            .get_mut(container)
            .and_then(|parts| parts.get_mut(&doc.partition_key));
        let Some(partition) = partition else {
            return Err(Error::NotFound(format!(
                "document {}/{} in {container}",
                doc.partition_key, doc.id
            )));
        };
        let Some(existing) = partition.get(&doc.id) else {
            return Err(Error::NotFound(format!(
                "document {}/{} in {container}",
                doc.partition_key, doc.id
            )));
        };
        if let Some(expected) = doc.version {
            if existing.version != Some(expected) {
                return Err(Error::Conflict(format!(
                    "version mismatch for {}/{}: expected {expected}, stored {:?}",
                    doc.partition_key, doc.id, existing.version
                )));
            }
        }
        doc.version = Some(existing.version.unwrap_or(0) + 1);
        partition.insert(doc.id.clone(), doc.clone());
        drop(containers);
        self.flush_container(container)?;
        Ok(doc)
    }

    async fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<()> {
        let removed = {
            let mut containers = self.containers.write();
            let Some(parts) = containers.get_mut(container) else {
                return Ok(());
            };
            match partition_key {
                Some(pk) => parts.get_mut(pk).map(|m| m.remove(id).is_some()),
                None => Some(
                    parts
                        .values_mut()
                        .any(|m| m.remove(id).is_some()),
                ),
            }
            .unwrap_or(false)
        };
        if removed {
            self.flush_container(container)?;
        }
        Ok(())
    }

    async fn query(
        &self,
        container: &str,
        predicate: QueryPredicate,
        partition_key: Option<&str>,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
    ) -> Result<Vec<Document>> {
        let containers = self.containers.read();
        let Some(parts) = containers.get(container) else {
            return Ok(Vec::new());
        };
        let mut results: Vec<Document> = match partition_key {
            Some(pk) => parts
                .get(pk)
                .map(|m| m.values().filter(|d| predicate.matches(d)).cloned().collect())
                .unwrap_or_default(),
            None => parts
                .values()
                .flat_map(|m| m.values())
                .filter(|d| predicate.matches(d))
                .cloned()
                .collect(),
        };
        drop(containers);

        if let Some(order) = order_by {
            results.sort_by(|a, b| {
                let av = a.attribute(&order.field);
                let bv = b.attribute(&order.field);
                let ord = compare_values(av, bv);
                if order.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        } else {
            // Deterministic default order.
            results.sort_by(|a, b| a.id.cmp(&b.id));
        }
        if let Some(limit) = limit {
            results.truncate(limit);
        }
        Ok(results)
    }

    async fn health_check(&self) -> Result<HealthCheckResult> {
        let started = Instant::now();
        let documents = self.document_count();
        let containers = self.containers.read().len();
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        Ok(HealthCheckResult::healthy(latency_ms)
            .with_detail("containers", json!(containers))
            .with_detail("documents", json!(documents))
            .with_detail("durable", json!(self.base_path.is_some())))
    }
}

fn compare_values(
    a: Option<&serde_json::Value>,
    b: Option<&serde_json::Value>,
) -> std::cmp::Ordering {
    use serde_json::Value;
    use std::cmp::Ordering;
    match (a, b) {
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        _ => Ordering::Equal,
    }
}
