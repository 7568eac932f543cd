//! The storage provider contract.

use vx_domain::error::Result;
use vx_domain::health::HealthCheckResult;

use crate::document::{Document, OrderBy, QueryPredicate};

/// Trait every storage backend must implement.
///
/// Semantics the runtime relies on:
/// - `create` rejects a duplicate (partition_key, id) pair with a conflict.
/// - `update` enforces optimistic concurrency when the incoming document
///   carries a `version`, and bumps the stored version on success.
/// - `delete` is idempotent — removing a missing document is not an error.
/// - Queries are read-your-write within the same process.
#[async_trait::async_trait]
pub trait StorageProvider: Send + Sync {
    /// Create a container (namespace) if it does not already exist.
    async fn create_container_if_not_exists(&self, name: &str) -> Result<()>;

    /// Fetch a document by id.  When `partition_key` is `None` all
    /// partitions are searched (a cross-partition read).
    async fn get(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<Option<Document>>;

    /// Insert a new document.  Returns the stored document (version = 1).
    async fn create(&self, container: &str, doc: Document) -> Result<Document>;

    /// Replace an existing document, enforcing the version check when the
    /// incoming document carries one.
    async fn update(&self, container: &str, doc: Document) -> Result<Document>;

    /// Remove a document.  Idempotent.
    async fn delete(
        &self,
        container: &str,
        id: &str,
        partition_key: Option<&str>,
    ) -> Result<()>;

    /// Equality/prefix query, optionally scoped to one partition.
    async fn query(
        &self,
        container: &str,
        predicate: QueryPredicate,
        partition_key: Option<&str>,
        limit: Option<usize>,
        order_by: Option<OrderBy>,
    ) -> Result<Vec<Document>>;

    async fn health_check(&self) -> Result<HealthCheckResult>;
}
