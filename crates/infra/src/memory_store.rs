//! Process-local attempt store
//!
//! Keeps attempts in a vector behind a mutex. Useful for tests and for
//! short-lived processes that want metrics without a database.

use async_trait::async_trait;
use parking_lot::Mutex;
use steadycall_core::{AttemptRecord, AttemptSink, AttemptStats, AttemptStore, Result};

#[derive(Debug, Default)]
pub struct InMemoryAttemptStore {
    records: Mutex<Vec<AttemptRecord>>,
    /// Oldest records are evicted past this many
    capacity: Option<usize>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { records: Mutex::new(Vec::with_capacity(capacity)), capacity: Some(capacity.max(1)) }
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Copy of every stored record, oldest first
    pub fn records(&self) -> Vec<AttemptRecord> {
        self.records.lock().clone()
    }
}

#[async_trait]
impl AttemptSink for InMemoryAttemptStore {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<()> {
        let mut records = self.records.lock();
        if let Some(capacity) = self.capacity {
            if records.len() >= capacity {
                let overflow = records.len() + 1 - capacity;
                records.drain(..overflow);
            }
        }
        records.push(record);
        Ok(())
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn service_stats(&self, service_name: &str, since_ms: i64) -> Result<AttemptStats> {
        let records = self.records.lock();
        Ok(AttemptStats::from_records(records.iter().filter(|record| {
            record.service_name == service_name && record.attempt.timestamp_ms >= since_ms
        })))
    }

    async fn recent_attempts(
        &self,
        service_name: &str,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let records = self.records.lock();
        let mut matching: Vec<AttemptRecord> =
            records.iter().filter(|record| record.service_name == service_name).cloned().collect();
        // Newest first; ties go to the latest insert
        matching.sort_by_key(|record| record.attempt.timestamp_ms);
        matching.reverse();
        matching.truncate(limit);
        Ok(matching)
    }

    async fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|record| record.attempt.timestamp_ms >= cutoff_ms);
        Ok((before - records.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use steadycall_core::{FailureKind, RetryAttempt};

    use super::*;

    fn record(service: &str, number: u32, success: bool, at: i64) -> AttemptRecord {
        AttemptRecord {
            service_name: service.into(),
            operation_id: format!("{service}-op"),
            success,
            attempt: RetryAttempt {
                attempt_number: number,
                delay_ms: 0,
                timestamp_ms: at,
                error: None,
                failure_kind: (!success).then_some(FailureKind::ConnectionError),
                response_time_ms: 10,
            },
        }
    }

    #[tokio::test]
    async fn capacity_evicts_oldest() {
        let store = InMemoryAttemptStore::with_capacity(2);
        for at in 1..=3 {
            store.record_attempt(record("search", 1, true, at)).await.expect("record");
        }

        let stamps: Vec<i64> =
            store.records().iter().map(|record| record.attempt.timestamp_ms).collect();
        assert_eq!(stamps, vec![2, 3]);
    }

    #[tokio::test]
    async fn stats_filter_by_service_and_window() {
        let store = InMemoryAttemptStore::new();
        store.record_attempt(record("search", 1, false, 100)).await.expect("record");
        store.record_attempt(record("search", 2, true, 200)).await.expect("record");
        store.record_attempt(record("billing", 1, true, 200)).await.expect("record");

        let stats = store.service_stats("search", 150).await.expect("stats");
        assert_eq!(stats.total_attempts, 1);
        assert_eq!(stats.successful_attempts, 1);

        let all = store.service_stats("search", 0).await.expect("stats");
        assert_eq!(all.total_attempts, 2);
        assert_eq!(all.max_attempts_per_operation, 2);
    }

    #[tokio::test]
    async fn recent_and_cleanup() {
        let store = InMemoryAttemptStore::new();
        for at in [10, 30, 20] {
            store.record_attempt(record("search", 1, true, at)).await.expect("record");
        }

        let recent = store.recent_attempts("search", 2).await.expect("recent");
        let stamps: Vec<i64> = recent.iter().map(|record| record.attempt.timestamp_ms).collect();
        assert_eq!(stamps, vec![30, 20]);

        assert_eq!(store.cleanup_older_than(25).await.expect("cleanup"), 2);
        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
    }
}
