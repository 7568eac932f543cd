//! Per-resource circuit breaker.
//!
//! Closed: calls flow, consecutive failures are counted.  Open: calls are
//! rejected immediately; after the configured timeout the next call
//! becomes a half-open probe.  Half-open: a bounded number of concurrent
//! probes are allowed — one failure re-opens, enough consecutive
//! successes close.  State transitions are atomic under one lock; the
//! lock is never held across the wrapped call.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use vx_domain::config::BreakerConfig;
use vx_domain::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,
    pub is_operational: bool,
}

struct State {
    circuit: CircuitState,
    failure_count: u32,
    /// Consecutive successes while half-open.
    success_count: u32,
    half_open_in_flight: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    state: Mutex<State>,
}

/// What the pre-call admission decided; threaded to the post-call
/// bookkeeping so a probe result is attributed correctly.
enum Admission {
    Closed,
    Probe,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: Mutex::new(State {
                circuit: CircuitState::Closed,
                failure_count: 0,
                success_count: 0,
                half_open_in_flight: 0,
                last_failure: None,
                last_failure_at: None,
            }),
        }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.config.timeout_seconds.max(0.0))
    }

    /// Run `fut` through the breaker.
    pub async fn call<T, Fut>(&self, fut: Fut) -> Result<T>
    where
        Fut: Future<Output = Result<T>>,
    {
        let admission = self.admit()?;
        let result = fut.await;
        match &result {
            Ok(_) => self.on_success(&admission),
            Err(_) => self.on_failure(&admission),
        }
        result
    }

    fn admit(&self) -> Result<Admission> {
        let mut state = self.state.lock();
        match state.circuit {
            CircuitState::Closed => Ok(Admission::Closed),
            CircuitState::Open => {
                let elapsed = state
                    .last_failure
                    .map(|at| at.elapsed() >= self.timeout())
                    .unwrap_or(true);
                if elapsed {
                    state.circuit = CircuitState::HalfOpen;
                    state.success_count = 0;
                    state.half_open_in_flight = 1;
                    tracing::info!(breaker = %self.name, "circuit half-open, probing");
                    Ok(Admission::Probe)
                } else {
                    Err(Error::CircuitOpen(self.name.clone()))
                }
            }
            CircuitState::HalfOpen => {
                if state.half_open_in_flight >= self.config.half_open_requests {
                    Err(Error::CircuitOpen(self.name.clone()))
                } else {
                    state.half_open_in_flight += 1;
                    Ok(Admission::Probe)
                }
            }
        }
    }

    fn on_success(&self, admission: &Admission) {
        let mut state = self.state.lock();
        match admission {
            Admission::Closed => {
                state.failure_count = 0;
            }
            Admission::Probe => {
                // The probe's slot is only meaningful if the circuit is
                // still half-open (a concurrent probe may have re-opened).
                if state.circuit == CircuitState::HalfOpen {
                    state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                    state.success_count += 1;
                    if state.success_count >= self.config.success_threshold {
                        state.circuit = CircuitState::Closed;
                        state.failure_count = 0;
                        state.success_count = 0;
                        state.half_open_in_flight = 0;
                        tracing::info!(breaker = %self.name, "circuit closed");
                    }
                }
            }
        }
    }

    fn on_failure(&self, admission: &Admission) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.last_failure_at = Some(Utc::now());
        match admission {
            Admission::Closed => {
                if state.circuit == CircuitState::Closed
                    && state.failure_count >= self.config.failure_threshold
                {
                    state.circuit = CircuitState::Open;
                    tracing::warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        "circuit opened"
                    );
                }
            }
            Admission::Probe => {
                state.circuit = CircuitState::Open;
                state.success_count = 0;
                state.half_open_in_flight = 0;
                tracing::warn!(breaker = %self.name, "half-open probe failed, circuit re-opened");
            }
        }
    }

    /// Feed an externally-observed success (health monitor path).
    pub fn record_success(&self) {
        let admission = {
            let state = self.state.lock();
            match state.circuit {
                CircuitState::Closed => Admission::Closed,
                CircuitState::HalfOpen => Admission::Probe,
                // Successes observed while open don't transition anything;
                // recovery goes through the half-open probe path.
                CircuitState::Open => return,
            }
        };
        self.on_success(&admission);
    }

    /// Feed an externally-observed failure (health monitor path).
    pub fn record_failure(&self) {
        let admission = {
            let state = self.state.lock();
            match state.circuit {
                CircuitState::Closed => Admission::Closed,
                _ => Admission::Probe,
            }
        };
        self.on_failure(&admission);
    }

    pub fn state(&self) -> CircuitState {
        self.state.lock().circuit
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let state = self.state.lock();
        BreakerSnapshot {
            name: self.name.clone(),
            state: state.circuit,
            failure_count: state.failure_count,
            success_count: state.success_count,
            last_failure_time: state.last_failure_at,
            is_operational: state.circuit != CircuitState::Open,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(failures: u32, successes: u32, timeout: f64) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: failures,
            success_threshold: successes,
            timeout_seconds: timeout,
            half_open_requests: 3,
        }
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<()> {
        breaker
            .call(async { Err::<(), _>(Error::Internal("boom".into())) })
            .await
            .map(|_| ())
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<&'static str> {
        breaker.call(async { Ok("success") }).await
    }

    #[tokio::test]
    async fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new("test", config(3, 2, 60.0));

        assert_eq!(succeed(&breaker).await.unwrap(), "success");
        assert_eq!(succeed(&breaker).await.unwrap(), "success");

        for _ in 0..3 {
            assert!(fail(&breaker).await.is_err());
        }
        assert!(breaker.is_open());

        // Rejected immediately with circuit_open.
        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));
    }

    #[tokio::test]
    async fn success_resets_closed_failure_count() {
        let breaker = CircuitBreaker::new("test", config(3, 1, 60.0));
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        succeed(&breaker).await.unwrap();
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        // Still closed: the success reset the streak.
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn half_open_recovery_cycle() {
        let breaker = CircuitBreaker::new("test", config(2, 2, 0.5));

        // Open the circuit.
        fail(&breaker).await.ok();
        fail(&breaker).await.ok();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Wait past the timeout; the next call is a half-open probe and
        // its failure re-opens the circuit.
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(fail(&breaker).await.is_err());
        assert_eq!(breaker.state(), CircuitState::Open);

        // Wait again; two successes close the breaker.
        tokio::time::sleep(Duration::from_millis(600)).await;
        succeed(&breaker).await.unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        succeed(&breaker).await.unwrap();
        assert!(breaker.is_closed());
    }

    #[tokio::test]
    async fn half_open_limits_concurrent_probes() {
        let breaker = CircuitBreaker::new(
            "test",
            BreakerConfig {
                failure_threshold: 1,
                success_threshold: 10,
                timeout_seconds: 0.0,
                half_open_requests: 1,
            },
        );
        fail(&breaker).await.ok();

        // timeout 0 → immediately half-open; hold one probe in flight.
        let in_probe = std::sync::Arc::new(AtomicU32::new(0));
        let probe_counter = in_probe.clone();
        let probe = breaker.call(async move {
            probe_counter.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, Error>(())
        });
        tokio::pin!(probe);

        // Poll the probe once so it acquires the half-open slot.
        tokio::select! {
            _ = &mut probe => panic!("probe finished too early"),
            _ = tokio::time::sleep(Duration::from_millis(50)) => {}
        }
        assert_eq!(in_probe.load(Ordering::SeqCst), 1);

        // Second call is rejected while the only slot is taken.
        let err = succeed(&breaker).await.unwrap_err();
        assert!(matches!(err, Error::CircuitOpen(_)));

        probe.await.unwrap();
    }

    #[tokio::test]
    async fn snapshot_tracks_state() {
        let breaker = CircuitBreaker::new("resource", config(2, 1, 60.0));

        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.failure_count, 0);
        assert!(snap.is_operational);
        assert!(snap.last_failure_time.is_none());

        fail(&breaker).await.ok();
        fail(&breaker).await.ok();

        let snap = breaker.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.failure_count, 2);
        assert!(!snap.is_operational);
        assert!(snap.last_failure_time.is_some());
        assert_eq!(snap.name, "resource");
    }

    #[tokio::test]
    async fn monitor_fed_results_drive_transitions() {
        let breaker = CircuitBreaker::new("test", config(2, 1, 0.0));
        breaker.record_failure();
        breaker.record_failure();
        assert!(breaker.is_open());

        // Success while open is ignored.
        breaker.record_success();
        assert!(breaker.is_open());

        // timeout 0: the next wrapped call probes and closes.
        breaker.call(async { Ok::<_, Error>(()) }).await.unwrap();
        assert!(breaker.is_closed());
    }
}
