//! Registry of named circuit breakers.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Owns one breaker per dependency name.
///
/// Breakers are created lazily on first lookup, using the per-name override
/// when one was configured and the registry default otherwise. The registry
/// is constructed explicitly and handed to whoever needs breakers.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    defaults: CircuitBreakerConfig,
    overrides: HashMap<String, CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create a registry using `defaults` for breakers without an override.
    pub fn new(defaults: CircuitBreakerConfig) -> Self {
        Self {
            defaults,
            overrides: HashMap::new(),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Configure a specific breaker name.
    pub fn with_override(mut self, config: CircuitBreakerConfig) -> Self {
        self.overrides.insert(config.name.clone(), config);
        self
    }

    /// Get the breaker for `name`, creating it on first use.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(name) {
            return breaker.clone();
        }

        let mut breakers = self.breakers.write();
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(name, "Creating circuit breaker");
                let config = self
                    .overrides
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| self.defaults.renamed(name));
                CircuitBreaker::new(config)
            })
            .clone()
    }

    /// Get an existing breaker.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(name).cloned()
    }

    /// Names of all created breakers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Statistics for every created breaker, sorted by name.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<CircuitBreakerStats> =
            self.breakers.read().values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_get_or_create_returns_shared_instance() {
        let registry = BreakerRegistry::default();
        let a = registry.get_or_create("webhook_delivery");
        let b = registry.get_or_create("webhook_delivery");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name(), "webhook_delivery");
    }

    #[test]
    fn test_defaults_and_overrides() {
        let registry = BreakerRegistry::new(CircuitBreakerConfig::default().failure_threshold(7))
            .with_override(
                CircuitBreakerConfig::new("smtp")
                    .failure_threshold(2)
                    .half_open_after(Duration::from_secs(5)),
            );

        let smtp = registry.get_or_create("smtp");
        assert_eq!(smtp.config().failure_threshold, 2);
        assert_eq!(smtp.config().half_open_after, Duration::from_secs(5));

        let other = registry.get_or_create("geocoder");
        assert_eq!(other.config().failure_threshold, 7);
        assert_eq!(other.name(), "geocoder");
    }

    #[test]
    fn test_get_and_names() {
        let registry = BreakerRegistry::default();
        assert!(registry.get("missing").is_none());

        registry.get_or_create("b");
        registry.get_or_create("a");
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(registry.stats().len(), 2);
        assert_eq!(registry.stats()[0].name, "a");
    }
}
