//! `vx-registry` — driver, tool, and model registries.
//!
//! Drivers are long-lived components registered by manifest that declare
//! event-type-prefix capabilities; the driver registry routes events to
//! them longest-match-first.  The tool registry exposes two views over
//! the same specs (a planner view with only the argument surface, and the
//! full runtime view).  The model registry carries the model catalog,
//! per-model costs, and the usage ledger.
//!
//! All three registries hand out copy-on-write snapshots: reads clone an
//! `Arc`, writers swap it under a short lock.

pub mod driver;
pub mod drivers;
pub mod models;
pub mod tools;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use driver::{Driver, DriverKind, DriverManifest, DriverStatus, ResourceSpec};
pub use drivers::{DriverInfo, DriverRegistry};
pub use models::{ModelRegistry, ModelSpec, UsageRecord, UsageStats};
pub use tools::{ApprovalPolicy, PlannerToolView, SandboxPolicy, ToolRegistry, ToolSpec};
