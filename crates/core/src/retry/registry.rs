//! Per-service breakers, bulkheads and health windows
//!
//! The registry hands out shared handles keyed by service name. The first
//! caller for a service decides its settings; later callers get the same
//! instance regardless of the configuration they pass.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use steadycall_common::resilience::{
    AdaptiveConfig, AdaptiveDelayCalculator, Bulkhead, BulkheadSnapshot, CircuitBreaker,
    CircuitBreakerConfig, CircuitBreakerSnapshot, Clock, ConfigResult, SystemClock,
};
use tracing::{debug, info};

/// Registry of resilience state for every service the executor has seen
pub struct ServiceRegistry<C: Clock + Clone = SystemClock> {
    clock: C,
    breakers: DashMap<String, Arc<CircuitBreaker<C>>>,
    bulkheads: DashMap<String, Arc<Bulkhead>>,
    /// Fed only by executions with adaptive backoff enabled
    adaptive: AdaptiveDelayCalculator,
    /// Fed by every attempt
    health: AdaptiveDelayCalculator,
}

impl ServiceRegistry<SystemClock> {
    pub fn new(adaptive: AdaptiveConfig) -> ConfigResult<Self> {
        Self::with_clock(adaptive, SystemClock)
    }
}

impl<C: Clock + Clone> ServiceRegistry<C> {
    /// Create a registry whose breakers run on `clock`
    pub fn with_clock(adaptive: AdaptiveConfig, clock: C) -> ConfigResult<Self> {
        Ok(Self {
            clock,
            breakers: DashMap::new(),
            bulkheads: DashMap::new(),
            health: AdaptiveDelayCalculator::new(adaptive.clone())?,
            adaptive: AdaptiveDelayCalculator::new(adaptive)?,
        })
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Outcome window that drives adaptive backoff
    pub fn adaptive(&self) -> &AdaptiveDelayCalculator {
        &self.adaptive
    }

    /// Outcome window of every attempt, used for in-memory metrics
    pub fn health(&self) -> &AdaptiveDelayCalculator {
        &self.health
    }

    /// Breaker for `service`, created from `config` on first use
    pub fn circuit_breaker(
        &self,
        service: &str,
        config: &CircuitBreakerConfig,
    ) -> ConfigResult<Arc<CircuitBreaker<C>>> {
        if let Some(existing) = self.breakers.get(service) {
            return Ok(Arc::clone(existing.value()));
        }

        let created =
            Arc::new(CircuitBreaker::with_clock(service, config.clone(), self.clock.clone())?);
        let entry = self.breakers.entry(service.to_string()).or_insert(created);
        debug!(service, "Registered circuit breaker");
        Ok(Arc::clone(entry.value()))
    }

    /// Bulkhead for `service`, created with `max_concurrent_calls` slots on
    /// first use
    pub fn bulkhead(
        &self,
        service: &str,
        max_concurrent_calls: usize,
        acquire_timeout: Duration,
    ) -> ConfigResult<Arc<Bulkhead>> {
        if let Some(existing) = self.bulkheads.get(service) {
            return Ok(Arc::clone(existing.value()));
        }

        let created = Arc::new(Bulkhead::new(service, max_concurrent_calls, acquire_timeout)?);
        let entry = self.bulkheads.entry(service.to_string()).or_insert(created);
        debug!(service, max_concurrent_calls, "Registered bulkhead");
        Ok(Arc::clone(entry.value()))
    }

    pub fn get_circuit_breaker(&self, service: &str) -> Option<Arc<CircuitBreaker<C>>> {
        self.breakers.get(service).map(|entry| Arc::clone(entry.value()))
    }

    pub fn get_bulkhead(&self, service: &str) -> Option<Arc<Bulkhead>> {
        self.bulkheads.get(service).map(|entry| Arc::clone(entry.value()))
    }

    /// Force the breaker for `service` closed; `false` if none exists
    pub fn reset_circuit_breaker(&self, service: &str) -> bool {
        match self.get_circuit_breaker(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Forget every piece of state kept for `service`
    pub fn remove_service(&self, service: &str) -> bool {
        let breaker = self.breakers.remove(service).is_some();
        let bulkhead = self.bulkheads.remove(service).is_some();
        let adaptive = self.adaptive.remove(service);
        let health = self.health.remove(service);
        let removed = breaker || bulkhead || adaptive || health;
        if removed {
            info!(service, "Removed service state");
        }
        removed
    }

    /// Breaker snapshots sorted by service name
    pub fn circuit_breaker_snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let breakers: Vec<_> = self.breakers.iter().map(|entry| Arc::clone(entry.value())).collect();
        let mut snapshots: Vec<_> = breakers.iter().map(|breaker| breaker.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        snapshots
    }

    /// Bulkhead snapshots sorted by service name
    pub fn bulkhead_snapshots(&self) -> Vec<BulkheadSnapshot> {
        let mut snapshots: Vec<_> =
            self.bulkheads.iter().map(|entry| entry.value().snapshot()).collect();
        snapshots.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        snapshots
    }

    /// Every service with a breaker, bulkhead or health window
    pub fn service_names(&self) -> Vec<String> {
        let mut names: BTreeSet<String> =
            self.breakers.iter().map(|entry| entry.key().clone()).collect();
        names.extend(self.bulkheads.iter().map(|entry| entry.key().clone()));
        names.extend(self.adaptive.services());
        names.extend(self.health.services());
        names.into_iter().collect()
    }
}
