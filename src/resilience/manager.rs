//! # Circuit Breaker Manager
//!
//! Registry of named circuit breakers, one per protected resource. Callers
//! that share a resource name share the breaker instance and therefore its
//! failure accounting.

use super::{CircuitBreaker, SystemCircuitBreakerMetrics};
use crate::config::CircuitBreakerConfig;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct CircuitBreakerManager {
    default_config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerManager {
    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self {
            default_config: config.clone(),
            breakers: DashMap::new(),
        }
    }

    /// Get or lazily create the breaker protecting `component`
    pub fn get_circuit_breaker(&self, component: &str) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(component.to_string())
            .or_insert_with(|| {
                debug!(component = %component, "Creating circuit breaker");
                Arc::new(CircuitBreaker::new(component, self.default_config.clone()))
            })
            .clone()
    }

    /// Register a breaker with a component-specific configuration
    pub fn register(&self, component: &str, config: CircuitBreakerConfig) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::new(component, config));
        self.breakers
            .insert(component.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn component_names(&self) -> Vec<String> {
        self.breakers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn system_metrics(&self) -> SystemCircuitBreakerMetrics {
        let metrics: HashMap<_, _> = self
            .breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().metrics()))
            .collect();
        SystemCircuitBreakerMetrics::from_metrics(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::CircuitState;

    #[test]
    fn test_shared_instance_per_component() {
        let manager = CircuitBreakerManager::from_config(&CircuitBreakerConfig {
            failure_threshold: 1,
            timeout_ms: 60_000,
        });

        let first = manager.get_circuit_breaker("cache");
        let second = manager.get_circuit_breaker("cache");
        assert!(Arc::ptr_eq(&first, &second));

        first.record_failure();
        assert_eq!(second.state(), CircuitState::Open);

        let other = manager.get_circuit_breaker("batch_engine");
        assert_eq!(other.state(), CircuitState::Closed);

        let metrics = manager.system_metrics();
        assert_eq!(metrics.open_circuits, 1);
        assert!(!metrics.all_closed());
    }
}
