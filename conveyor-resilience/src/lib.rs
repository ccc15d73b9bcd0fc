//! Resilience primitives for Conveyor.
//!
//! - 🔌 [`CircuitBreaker`]: consecutive-failure tripwire with a single
//!   half-open trial after a cool-down
//! - 📇 [`BreakerRegistry`]: explicit owner of named breakers, so several call
//!   sites can share one breaker per dependency
//!
//! ## Quick Start
//!
//! ```
//! use conveyor_resilience::{BreakerRegistry, CircuitBreakerConfig, CircuitState};
//!
//! let registry = BreakerRegistry::new(CircuitBreakerConfig::default().failure_threshold(3));
//! let breaker = registry.get_or_create("payments");
//!
//! assert_eq!(breaker.state(), CircuitState::Closed);
//! assert_eq!(breaker.config().failure_threshold, 3);
//! ```

pub mod circuit_breaker;
pub mod registry;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerStats, CircuitState,
};
pub use registry::BreakerRegistry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::circuit_breaker::{
        CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
    };
    pub use crate::registry::BreakerRegistry;
}
