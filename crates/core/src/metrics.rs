//! Service metrics and system status
//!
//! Metrics come from the attempt store when one is attached; otherwise they
//! fall back to the in-memory health window kept for adaptive backoff.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use steadycall_common::resilience::{
    BulkheadSnapshot, CircuitBreakerSnapshot, CircuitState, Clock, SystemClock,
};
use tracing::debug;

use crate::errors::{Result, SteadycallError};
use crate::ports::{AttemptStats, AttemptStore};
use crate::retry::ServiceRegistry;

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Where a [`ServiceMetrics`] value was computed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsSource {
    /// Persisted attempts within the requested window
    Store,
    /// The rolling health window; ignores the requested window
    InMemory,
}

/// Health of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_name: String,
    pub window_hours: u64,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    /// Successful share in `[0, 1]`
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub avg_delay_ms: f64,
    pub max_attempts_per_operation: u32,
    /// `None` until the service has run with its breaker enabled
    pub circuit_breaker_state: Option<CircuitState>,
    /// Percent of bulkhead slots in use
    pub bulkhead_utilization: f64,
    pub source: MetricsSource,
}

/// Every breaker and bulkhead at a glance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub circuit_breakers: Vec<CircuitBreakerSnapshot>,
    pub bulkheads: Vec<BulkheadSnapshot>,
    pub open_circuit_breakers: usize,
    pub saturated_bulkheads: usize,
    pub total_services: usize,
}

/// Read side over the registry and the optional attempt store
pub struct ResilienceMonitor<C: Clock + Clone = SystemClock> {
    registry: Arc<ServiceRegistry<C>>,
    store: Option<Arc<dyn AttemptStore>>,
}

impl<C: Clock + Clone> Clone for ResilienceMonitor<C> {
    fn clone(&self) -> Self {
        Self { registry: Arc::clone(&self.registry), store: self.store.clone() }
    }
}

impl<C: Clock + Clone> ResilienceMonitor<C> {
    pub fn new(registry: Arc<ServiceRegistry<C>>) -> Self {
        Self { registry, store: None }
    }

    pub fn with_store(mut self, store: Arc<dyn AttemptStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Metrics for `service_name` over the last `window_hours`
    pub async fn service_metrics(
        &self,
        service_name: &str,
        window_hours: u64,
    ) -> Result<ServiceMetrics> {
        if window_hours == 0 {
            return Err(SteadycallError::InvalidInput("window_hours must be greater than 0".into()));
        }

        let (stats, source) = match &self.store {
            Some(store) => {
                let since_ms = self.window_start_ms(window_hours);
                (store.service_stats(service_name, since_ms).await?, MetricsSource::Store)
            }
            None => (self.in_memory_stats(service_name), MetricsSource::InMemory),
        };

        let circuit_breaker_state =
            self.registry.get_circuit_breaker(service_name).map(|breaker| breaker.state());
        let bulkhead_utilization =
            self.registry.get_bulkhead(service_name).map_or(0.0, |bulkhead| bulkhead.utilization());

        debug!(service = service_name, window_hours, ?source, "Computed service metrics");

        Ok(ServiceMetrics {
            service_name: service_name.to_string(),
            window_hours,
            success_rate: stats.success_rate(),
            total_attempts: stats.total_attempts,
            successful_attempts: stats.successful_attempts,
            avg_response_time_ms: stats.avg_response_time_ms,
            avg_delay_ms: stats.avg_delay_ms,
            max_attempts_per_operation: stats.max_attempts_per_operation,
            circuit_breaker_state,
            bulkhead_utilization,
            source,
        })
    }

    /// Snapshot of every breaker and bulkhead
    pub fn system_status(&self) -> SystemStatus {
        let circuit_breakers = self.registry.circuit_breaker_snapshots();
        let bulkheads = self.registry.bulkhead_snapshots();

        SystemStatus {
            open_circuit_breakers: circuit_breakers
                .iter()
                .filter(|snapshot| snapshot.state == CircuitState::Open)
                .count(),
            saturated_bulkheads: bulkheads.iter().filter(|snapshot| snapshot.is_saturated()).count(),
            total_services: self.registry.service_names().len(),
            circuit_breakers,
            bulkheads,
        }
    }

    pub fn reset_circuit_breaker(&self, service_name: &str) -> bool {
        self.registry.reset_circuit_breaker(service_name)
    }

    fn window_start_ms(&self, window_hours: u64) -> i64 {
        let now_ms = i64::try_from(self.registry.clock().millis_since_epoch()).unwrap_or(i64::MAX);
        let window_ms = i64::try_from(window_hours).unwrap_or(i64::MAX).saturating_mul(MILLIS_PER_HOUR);
        now_ms.saturating_sub(window_ms)
    }

    fn in_memory_stats(&self, service_name: &str) -> AttemptStats {
        match self.registry.health().stats(service_name) {
            Some(window) => AttemptStats {
                total_attempts: window.samples as u64,
                successful_attempts: window.successes as u64,
                avg_response_time_ms: window.avg_response_time_ms,
                avg_delay_ms: 0.0,
                max_attempts_per_operation: 0,
            },
            None => AttemptStats::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use steadycall_common::resilience::{AdaptiveConfig, CircuitBreakerConfig, MockClock};

    use super::*;
    use crate::ports::{AttemptRecord, AttemptSink};

    /// Store that remembers the last `since_ms` it was asked for
    #[derive(Default)]
    struct FixedStore {
        since: Mutex<Option<i64>>,
    }

    #[async_trait]
    impl AttemptSink for FixedStore {
        async fn record_attempt(&self, _record: AttemptRecord) -> Result<()> {
            Ok(())
        }
    }

    #[async_trait]
    impl AttemptStore for FixedStore {
        async fn service_stats(&self, _service_name: &str, since_ms: i64) -> Result<AttemptStats> {
            *self.since.lock() = Some(since_ms);
            Ok(AttemptStats {
                total_attempts: 10,
                successful_attempts: 8,
                avg_response_time_ms: 42.0,
                avg_delay_ms: 5.0,
                max_attempts_per_operation: 3,
            })
        }

        async fn recent_attempts(&self, _service: &str, _limit: usize) -> Result<Vec<AttemptRecord>> {
            Ok(Vec::new())
        }

        async fn cleanup_older_than(&self, _cutoff_ms: i64) -> Result<u64> {
            Ok(0)
        }
    }

    fn registry() -> (Arc<ServiceRegistry<MockClock>>, MockClock) {
        let clock = MockClock::new();
        let registry = ServiceRegistry::with_clock(AdaptiveConfig::default(), clock.clone())
            .expect("default adaptive config is valid");
        (Arc::new(registry), clock)
    }

    /// Validates the in-memory fallback uses the health window.
    ///
    /// Assertions:
    /// - Confirms counts and rates mirror the health window.
    /// - Confirms an unknown service yields zeros without error.
    #[tokio::test]
    async fn test_in_memory_metrics() {
        let (registry, _clock) = registry();
        registry.health().update("search", true, 100);
        registry.health().update("search", false, 300);
        let monitor = ResilienceMonitor::new(Arc::clone(&registry));

        let metrics = monitor.service_metrics("search", 24).await.expect("metrics");
        assert_eq!(metrics.source, MetricsSource::InMemory);
        assert_eq!(metrics.total_attempts, 2);
        assert!((metrics.success_rate - 0.5).abs() < f64::EPSILON);
        assert!((metrics.avg_response_time_ms - 200.0).abs() < f64::EPSILON);
        assert_eq!(metrics.circuit_breaker_state, None);

        let unknown = monitor.service_metrics("ghost", 24).await.expect("metrics");
        assert_eq!(unknown.total_attempts, 0);
        assert_eq!(unknown.success_rate, 0.0);
    }

    /// Validates store-backed metrics and the requested window.
    ///
    /// Assertions:
    /// - Confirms the store is queried from `now - window_hours`.
    /// - Confirms a zero window is rejected.
    #[tokio::test]
    async fn test_store_metrics_window() {
        let (registry, clock) = registry();
        clock.set_elapsed(Duration::from_millis(10 * MILLIS_PER_HOUR as u64));
        let store = Arc::new(FixedStore::default());
        let monitor = ResilienceMonitor::new(registry).with_store(store.clone());

        let metrics = monitor.service_metrics("billing", 2).await.expect("metrics");
        assert_eq!(metrics.source, MetricsSource::Store);
        assert!((metrics.success_rate - 0.8).abs() < f64::EPSILON);
        assert_eq!(metrics.max_attempts_per_operation, 3);
        assert_eq!(*store.since.lock(), Some(8 * MILLIS_PER_HOUR));

        assert!(matches!(
            monitor.service_metrics("billing", 0).await,
            Err(SteadycallError::InvalidInput(_))
        ));
    }

    /// Validates system status counters.
    ///
    /// Assertions:
    /// - Confirms open breakers and saturated bulkheads are counted.
    /// - Confirms the total counts distinct services.
    #[tokio::test]
    async fn test_system_status() {
        let (registry, _clock) = registry();
        let tripping = CircuitBreakerConfig::builder().failure_threshold(1).build().expect("config");
        registry.circuit_breaker("billing", &tripping).expect("breaker").record_failure();
        registry.circuit_breaker("search", &tripping).expect("breaker");
        let bulkhead = registry.bulkhead("search", 1, Duration::from_millis(5)).expect("bulkhead");
        let _slot = bulkhead.try_acquire().expect("free slot");

        let status = ResilienceMonitor::new(registry).system_status();

        assert_eq!(status.open_circuit_breakers, 1);
        assert_eq!(status.saturated_bulkheads, 1);
        assert_eq!(status.total_services, 2);
        assert_eq!(status.circuit_breakers.len(), 2);
    }
}
