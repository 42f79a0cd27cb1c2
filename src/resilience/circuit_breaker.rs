//! # Circuit Breaker Implementation
//!
//! Fault isolation for a single protected resource. The breaker follows the
//! classic three-state pattern: Closed (normal operation), Open (failing fast)
//! and Half-Open (a single probing call decides recovery).
//!
//! The breaker is shared process-wide per resource and does not partition by
//! key: one downstream outage trips protection for every caller of that
//! resource.

use crate::config::CircuitBreakerConfig;
use crate::error::{BatchError, Result};
use crate::resilience::CircuitBreakerMetrics;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Circuit breaker states representing the current operational mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation - all calls are allowed through
    Closed = 0,
    /// Failure mode - all calls fail fast without executing
    Open = 1,
    /// Testing recovery - exactly one probing call is allowed
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Open, // Default to safest state
        }
    }
}

/// Signal emitted on every state transition
#[derive(Debug, Clone)]
pub struct CircuitEvent {
    pub component: String,
    pub from: CircuitState,
    pub to: CircuitState,
    pub failure_count: u32,
    pub at: chrono::DateTime<chrono::Utc>,
}

impl CircuitEvent {
    pub fn is_opening(&self) -> bool {
        self.to == CircuitState::Open
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    failure_count: u32,
    last_failure_at: Option<Instant>,
    probe_started_at: Option<Instant>,
    metrics: CircuitBreakerMetrics,
}

/// Core circuit breaker with atomic state and a short synchronous critical section
#[derive(Debug)]
pub struct CircuitBreaker {
    /// Component name for logging and metrics
    name: String,

    /// Current circuit state (atomic so `state()` never blocks)
    state: AtomicU8,

    config: CircuitBreakerConfig,

    inner: Mutex<BreakerInner>,

    events: broadcast::Sender<CircuitEvent>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker with the given name and configuration
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!(
            component = %name,
            failure_threshold = config.failure_threshold,
            timeout_ms = config.timeout_ms,
            "🛡️ Circuit breaker initialized"
        );

        let (events, _) = broadcast::channel(64);

        Self {
            name,
            state: AtomicU8::new(CircuitState::Closed as u8),
            config,
            inner: Mutex::new(BreakerInner::default()),
            events,
        }
    }

    /// Get current circuit state
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    fn timeout(&self) -> Duration {
        Duration::from_millis(self.config.timeout_ms)
    }

    /// Subscribe to state transition signals
    pub fn subscribe(&self) -> broadcast::Receiver<CircuitEvent> {
        self.events.subscribe()
    }

    /// Decide whether a call may proceed.
    ///
    /// Fails with [`BatchError::CircuitOpen`] while the breaker is open and the
    /// cooldown has not elapsed. Once it has, the breaker moves to half-open and
    /// lets exactly this call through as the recovery probe.
    pub fn allow(&self) -> Result<()> {
        let mut inner = self.inner.lock();

        match self.state() {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() >= self.timeout());

                if cooled_down {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_started_at = Some(Instant::now());
                    Ok(())
                } else {
                    inner.metrics.rejected_calls += 1;
                    Err(BatchError::circuit_open(&self.name))
                }
            }
            CircuitState::HalfOpen => {
                // A probe that never reported back must not wedge the breaker
                let probe_stale = inner
                    .probe_started_at
                    .map_or(true, |at| at.elapsed() >= self.timeout());

                if probe_stale {
                    inner.probe_started_at = Some(Instant::now());
                    Ok(())
                } else {
                    inner.metrics.rejected_calls += 1;
                    Err(BatchError::circuit_open(&self.name))
                }
            }
        }
    }

    /// Record a successful operation
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.success_count += 1;

        match self.state() {
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::HalfOpen => {
                inner.failure_count = 0;
                inner.probe_started_at = None;
                self.transition(&mut inner, CircuitState::Closed);
            }
            CircuitState::Open => {
                // Late result of a call admitted before the breaker opened
                debug!(component = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    /// Record a failed operation
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.metrics.total_calls += 1;
        inner.metrics.failure_count += 1;
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());

        match self.state() {
            CircuitState::Closed => {
                if inner.failure_count >= self.config.failure_threshold {
                    self.transition(&mut inner, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                inner.probe_started_at = None;
                self.transition(&mut inner, CircuitState::Open);
            }
            CircuitState::Open => {}
        }
    }

    /// Execute an operation with circuit breaker protection
    pub async fn call<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.allow()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    fn transition(&self, inner: &mut BreakerInner, to: CircuitState) {
        let from = self.state();
        if from == to {
            return;
        }
        self.state.store(to as u8, Ordering::Release);
        inner.metrics.current_state = to;

        match to {
            CircuitState::Open => {
                inner.metrics.times_opened += 1;
                error!(
                    component = %self.name,
                    failure_count = inner.failure_count,
                    failure_threshold = self.config.failure_threshold,
                    timeout_ms = self.config.timeout_ms,
                    "🔴 Circuit breaker opened (failing fast)"
                );
            }
            CircuitState::HalfOpen => {
                info!(component = %self.name, "🟡 Circuit breaker half-open (probing recovery)");
            }
            CircuitState::Closed => {
                info!(component = %self.name, "🟢 Circuit breaker closed (recovered)");
            }
        }

        // No subscribers is fine
        let _ = self.events.send(CircuitEvent {
            component: self.name.clone(),
            from,
            to,
            failure_count: inner.failure_count,
            at: chrono::Utc::now(),
        });
    }

    /// Force circuit to open state (maintenance override)
    pub fn force_open(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced open");
        let mut inner = self.inner.lock();
        inner.last_failure_at = Some(Instant::now());
        self.transition(&mut inner, CircuitState::Open);
    }

    /// Force circuit to closed state (maintenance override)
    pub fn force_closed(&self) {
        warn!(component = %self.name, "🚨 Circuit breaker forced closed");
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.probe_started_at = None;
        self.transition(&mut inner, CircuitState::Closed);
    }

    /// Get current metrics snapshot
    pub fn metrics(&self) -> CircuitBreakerMetrics {
        let inner = self.inner.lock();
        let mut snapshot = inner.metrics.clone();
        snapshot.current_state = self.state();
        snapshot.consecutive_failures = inner.failure_count;
        snapshot.failure_rate = if snapshot.total_calls > 0 {
            snapshot.failure_count as f64 / snapshot.total_calls as f64
        } else {
            0.0
        };
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32, timeout_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                timeout_ms,
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_threshold_failures() {
        let circuit = breaker(3, 1_000);

        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert!(circuit.allow().is_ok());

        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Open);

        for _ in 0..5 {
            assert!(matches!(
                circuit.allow(),
                Err(BatchError::CircuitOpen { .. })
            ));
        }
        assert_eq!(circuit.metrics().rejected_calls, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_success_closes() {
        let circuit = breaker(3, 1_000);
        for _ in 0..3 {
            circuit.record_failure();
        }

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(circuit.allow().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(circuit.allow().is_ok());
        assert_eq!(circuit.state(), CircuitState::HalfOpen);

        // Only the probe gets through
        assert!(circuit.allow().is_err());

        circuit.record_success();
        assert_eq!(circuit.state(), CircuitState::Closed);
        assert_eq!(circuit.failure_count(), 0);
        assert!(circuit.allow().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_probe_failure_reopens() {
        let circuit = breaker(3, 500);
        for _ in 0..3 {
            circuit.record_failure();
        }

        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(circuit.allow().is_ok());
        circuit.record_failure();

        assert_eq!(circuit.state(), CircuitState::Open);
        assert!(circuit.allow().is_err());
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let circuit = breaker(3, 1_000);
        circuit.record_failure();
        circuit.record_failure();
        circuit.record_success();
        circuit.record_failure();
        circuit.record_failure();
        assert_eq!(circuit.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_emits_event_on_open() {
        let circuit = breaker(1, 1_000);
        let mut events = circuit.subscribe();

        let result: Result<()> = circuit
            .call(|| async { Err(BatchError::transient("down")) })
            .await;
        assert!(result.is_err());

        let event = events.recv().await.unwrap();
        assert!(event.is_opening());
        assert_eq!(event.from, CircuitState::Closed);
        assert_eq!(event.component, "test");
    }

    #[tokio::test]
    async fn test_call_fails_fast_when_open() {
        let circuit = breaker(1, 60_000);
        circuit.force_open();

        let executed = std::sync::atomic::AtomicBool::new(false);
        let result = circuit
            .call(|| async {
                executed.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        assert!(matches!(result, Err(BatchError::CircuitOpen { .. })));
        assert!(!executed.load(Ordering::SeqCst));

        circuit.force_closed();
        assert!(circuit.call(|| async { Ok(1) }).await.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_snapshot() {
        let circuit = breaker(5, 1_000);
        circuit.record_success();
        circuit.record_failure();

        let metrics = circuit.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.success_count, 1);
        assert_eq!(metrics.failure_count, 1);
        assert_eq!(metrics.consecutive_failures, 1);
        assert!((metrics.failure_rate - 0.5).abs() < f64::EPSILON);
    }
}
