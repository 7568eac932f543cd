//! `vx-resilience` — circuit breakers and provider health monitoring.
//!
//! Every cross-boundary call (storage, bus, external providers) flows
//! through a per-resource [`CircuitBreaker`].  The [`HealthMonitor`]
//! polls registered providers and feeds each poll result into the
//! provider's breaker, so a provider that stops answering health checks
//! fails fast at the call site too.

pub mod breaker;
pub mod health;
pub mod wrappers;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use health::{HealthCheckable, HealthMonitor, HealthRecord, ProviderStatus};
pub use wrappers::{BusHealthAdapter, ResilientEventBus, ResilientStorage, StorageHealthAdapter};
