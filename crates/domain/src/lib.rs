//! `vx-domain` — shared types for the Vextir runtime core.
//!
//! Holds the canonical [`EventMessage`] envelope that every other crate
//! moves around, the workspace-wide [`error::Error`] taxonomy, and the
//! [`config::RuntimeConfig`] that drives runtime wiring.

pub mod config;
pub mod error;
pub mod event;
pub mod health;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use config::{ExecutionMode, RuntimeConfig};
pub use error::{Error, Result};
pub use event::{EventMessage, EventPriority};
pub use health::{HealthCheckResult, HealthStatus};
