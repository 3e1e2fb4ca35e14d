//! Bulkhead isolation for one downstream service
//!
//! A bulkhead caps the number of concurrent calls to a dependency with a
//! counting semaphore. Acquiring a slot is a bounded wait: when no permit
//! frees up within `acquire_timeout` the caller is told to fail fast instead
//! of joining an unbounded queue.
//!
//! Slots are handed out as [`BulkheadPermit`] guards and returned when the
//! guard drops, so a slot can never be released twice or released without
//! having been acquired.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use super::error::{ConfigError, ConfigResult};

/// Configuration for bulkhead behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Concurrent calls allowed per service; `None` derives the size from the
    /// retry budget of the first call that creates the bulkhead
    pub max_concurrent_calls: Option<usize>,
    /// Upper bound on the wait for a free slot
    pub acquire_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self { max_concurrent_calls: None, acquire_timeout_ms: 1_000 }
    }
}

impl BulkheadConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_concurrent_calls == Some(0) {
            return Err(ConfigError::invalid("max_concurrent_calls must be greater than 0"));
        }
        if let Some(max) = self.max_concurrent_calls {
            if max > Semaphore::MAX_PERMITS {
                return Err(ConfigError::invalid(format!(
                    "max_concurrent_calls must not exceed {}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }
        Ok(())
    }
}

/// Serializable view of one bulkhead
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkheadSnapshot {
    pub service_name: String,
    pub max_concurrent_calls: usize,
    pub current_calls: usize,
    /// `current_calls / max_concurrent_calls * 100`
    pub utilization: f64,
    pub rejected_calls: u64,
}

impl BulkheadSnapshot {
    /// Every slot is taken
    pub fn is_saturated(&self) -> bool {
        self.current_calls >= self.max_concurrent_calls
    }
}

/// Concurrency limiter for a single named service
pub struct Bulkhead {
    name: String,
    max_concurrent_calls: usize,
    acquire_timeout: Duration,
    semaphore: Arc<Semaphore>,
    rejected_calls: AtomicU64,
}

impl fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bulkhead")
            .field("name", &self.name)
            .field("max_concurrent_calls", &self.max_concurrent_calls)
            .field("current_calls", &self.current_calls())
            .finish()
    }
}

/// Occupied bulkhead slot; dropping it frees the slot
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct BulkheadPermit {
    _permit: OwnedSemaphorePermit,
}

impl Bulkhead {
    /// Create a bulkhead with `max_concurrent_calls` slots
    pub fn new(
        name: impl Into<String>,
        max_concurrent_calls: usize,
        acquire_timeout: Duration,
    ) -> ConfigResult<Self> {
        BulkheadConfig {
            max_concurrent_calls: Some(max_concurrent_calls),
            acquire_timeout_ms: 0,
        }
        .validate()?;

        Ok(Self {
            name: name.into(),
            max_concurrent_calls,
            acquire_timeout,
            semaphore: Arc::new(Semaphore::new(max_concurrent_calls)),
            rejected_calls: AtomicU64::new(0),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent_calls(&self) -> usize {
        self.max_concurrent_calls
    }

    /// Wait up to the configured timeout for a slot
    pub async fn acquire(&self) -> Option<BulkheadPermit> {
        self.acquire_within(self.acquire_timeout).await
    }

    /// Wait up to `timeout` for a slot; `None` means the bulkhead is full
    pub async fn acquire_within(&self, timeout: Duration) -> Option<BulkheadPermit> {
        let acquire = Arc::clone(&self.semaphore).acquire_owned();
        match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => Some(BulkheadPermit { _permit: permit }),
            Ok(Err(_)) | Err(_) => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                debug!(
                    service = %self.name,
                    max_concurrent_calls = self.max_concurrent_calls,
                    "Bulkhead full, rejecting call"
                );
                None
            }
        }
    }

    /// Take a slot only if one is free right now
    pub fn try_acquire(&self) -> Option<BulkheadPermit> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => Some(BulkheadPermit { _permit: permit }),
            Err(_) => {
                self.rejected_calls.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Slots currently held
    pub fn current_calls(&self) -> usize {
        self.max_concurrent_calls.saturating_sub(self.semaphore.available_permits())
    }

    /// Percentage of slots in use
    pub fn utilization(&self) -> f64 {
        self.current_calls() as f64 / self.max_concurrent_calls as f64 * 100.0
    }

    pub fn snapshot(&self) -> BulkheadSnapshot {
        let current_calls = self.current_calls();
        BulkheadSnapshot {
            service_name: self.name.clone(),
            max_concurrent_calls: self.max_concurrent_calls,
            current_calls,
            utilization: current_calls as f64 / self.max_concurrent_calls as f64 * 100.0,
            rejected_calls: self.rejected_calls.load(Ordering::Relaxed),
        }
    }
}
