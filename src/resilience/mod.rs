//! # Resilience Module
//!
//! Circuit breakers shared by the cache client and the batch engine's chunk
//! execution path.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ledgerbatch::config::CircuitBreakerConfig;
//! use ledgerbatch::resilience::CircuitBreaker;
//!
//! # async fn example() -> ledgerbatch::Result<()> {
//! let breaker = CircuitBreaker::new("cache", CircuitBreakerConfig::default());
//!
//! let value = breaker.call(|| async { Ok::<_, ledgerbatch::BatchError>("pong") }).await?;
//! # Ok(())
//! # }
//! ```

pub mod circuit_breaker;
pub mod manager;
pub mod metrics;

pub use circuit_breaker::{CircuitBreaker, CircuitEvent, CircuitState};
pub use manager::CircuitBreakerManager;
pub use metrics::{CircuitBreakerMetrics, SystemCircuitBreakerMetrics};
