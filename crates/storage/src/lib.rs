//! `vx-storage` — key-addressable document storage for the runtime.
//!
//! Provides the [`StorageProvider`] trait that registries, conversation
//! history, usage ledgers, and dead-letter queues persist through, plus
//! the bundled in-process implementation ([`MemoryStorageProvider`]).
//!
//! External stores (Cosmos, Dynamo, Redis, ...) plug in by implementing
//! the trait and handing an `Arc<dyn StorageProvider>` to the runtime
//! builder; nothing in the core names a concrete backend.

pub mod document;
pub mod memory;
pub mod provider;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use document::{Document, OrderBy, QueryPredicate};
pub use memory::MemoryStorageProvider;
pub use provider::StorageProvider;
