//! Attempt persistence ports
//!
//! The executor hands every attempt to an [`AttemptSink`]. Sinks that can
//! also answer queries implement [`AttemptStore`], which backs the metrics
//! surface. Adapters live in `steadycall-infra`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::Result;
use crate::retry::RetryAttempt;

/// One attempt as handed to a sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub service_name: String,
    pub operation_id: String,
    pub attempt: RetryAttempt,
    pub success: bool,
}

/// Aggregates over the attempts of one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptStats {
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub avg_response_time_ms: f64,
    pub avg_delay_ms: f64,
    /// Highest attempt number seen for any single operation
    pub max_attempts_per_operation: u32,
}

impl AttemptStats {
    /// Aggregate a set of records
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AttemptRecord>) -> Self {
        let mut stats = AttemptStats::default();
        let mut response_total = 0_u128;
        let mut delay_total = 0_u128;

        for record in records {
            stats.total_attempts += 1;
            if record.success {
                stats.successful_attempts += 1;
            }
            response_total += u128::from(record.attempt.response_time_ms);
            delay_total += u128::from(record.attempt.delay_ms);
            stats.max_attempts_per_operation =
                stats.max_attempts_per_operation.max(record.attempt.attempt_number);
        }

        if stats.total_attempts > 0 {
            stats.avg_response_time_ms = response_total as f64 / stats.total_attempts as f64;
            stats.avg_delay_ms = delay_total as f64 / stats.total_attempts as f64;
        }
        stats
    }

    /// Successful share in `[0, 1]`, 0 without attempts
    pub fn success_rate(&self) -> f64 {
        if self.total_attempts == 0 {
            0.0
        } else {
            self.successful_attempts as f64 / self.total_attempts as f64
        }
    }
}

/// Receives every attempt the executor makes
///
/// Failures are logged by the executor and never change an execution's
/// outcome.
#[async_trait]
pub trait AttemptSink: Send + Sync {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<()>;
}

/// Queryable attempt history
#[async_trait]
pub trait AttemptStore: AttemptSink {
    /// Aggregates for `service_name` over attempts at or after `since_ms`
    async fn service_stats(&self, service_name: &str, since_ms: i64) -> Result<AttemptStats>;

    /// Most recent attempts for `service_name`, newest first
    async fn recent_attempts(&self, service_name: &str, limit: usize)
        -> Result<Vec<AttemptRecord>>;

    /// Delete attempts older than `cutoff_ms`; returns the number removed
    async fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<u64>;
}

/// Default sink: one debug line per attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAttemptSink;

#[async_trait]
impl AttemptSink for LoggingAttemptSink {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<()> {
        debug!(
            service = %record.service_name,
            operation_id = %record.operation_id,
            attempt = record.attempt.attempt_number,
            success = record.success,
            failure_kind = ?record.attempt.failure_kind,
            response_time_ms = record.attempt.response_time_ms,
            delay_ms = record.attempt.delay_ms,
            "Recorded attempt"
        );
        Ok(())
    }
}
