//! Circuit breaker metrics snapshots

use super::CircuitState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Point-in-time counters for a single circuit breaker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub current_state: CircuitState,
    pub total_calls: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u32,
    /// Calls refused without touching the protected resource
    pub rejected_calls: u64,
    pub times_opened: u64,
    pub failure_rate: f64,
}

impl Default for CircuitBreakerMetrics {
    fn default() -> Self {
        Self {
            current_state: CircuitState::Closed,
            total_calls: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            rejected_calls: 0,
            times_opened: 0,
            failure_rate: 0.0,
        }
    }
}

/// Aggregated view over every breaker owned by a manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemCircuitBreakerMetrics {
    pub circuit_breakers: HashMap<String, CircuitBreakerMetrics>,
    pub open_circuits: usize,
    pub half_open_circuits: usize,
}

impl SystemCircuitBreakerMetrics {
    pub fn from_metrics(circuit_breakers: HashMap<String, CircuitBreakerMetrics>) -> Self {
        let open_circuits = circuit_breakers
            .values()
            .filter(|m| m.current_state == CircuitState::Open)
            .count();
        let half_open_circuits = circuit_breakers
            .values()
            .filter(|m| m.current_state == CircuitState::HalfOpen)
            .count();

        Self {
            circuit_breakers,
            open_circuits,
            half_open_circuits,
        }
    }

    pub fn all_closed(&self) -> bool {
        self.open_circuits == 0 && self.half_open_circuits == 0
    }
}
