//! Wiring from an [`AppConfig`] to a ready executor

use std::sync::Arc;

use steadycall_core::{
    AppConfig, AttemptStore, Result, RetryExecutor, StorageConfig, SteadycallError,
};
use tracing::info;

use crate::database::{DbManager, SqliteAttemptRepository};

const MILLIS_PER_HOUR: i64 = 3_600_000;

/// Build an executor for `config`
///
/// With storage enabled the SQLite database is opened, migrated and
/// attached as the attempt store; otherwise attempts go to the logging sink
/// and metrics come from memory.
pub fn build_executor(config: &AppConfig) -> Result<RetryExecutor> {
    config.validate()?;
    let executor = RetryExecutor::new(config.engine.clone())?;

    if !config.storage.enabled {
        info!("Attempt storage disabled");
        return Ok(executor);
    }

    let db = DbManager::from_config(&config.storage)?;
    db.run_migrations()?;
    info!(db_path = %db.path().display(), "Attempt storage ready");

    Ok(executor.with_store(Arc::new(SqliteAttemptRepository::new(Arc::new(db)))))
}

/// Delete attempts older than the configured retention, measured from
/// `now_ms`. Returns 0 without touching the store when retention is unset.
pub async fn purge_expired(
    store: &dyn AttemptStore,
    storage: &StorageConfig,
    now_ms: i64,
) -> Result<u64> {
    let Some(hours) = storage.retention_hours else {
        return Ok(0);
    };

    let hours = i64::try_from(hours)
        .map_err(|_| SteadycallError::Config(format!("retention_hours out of range: {hours}")))?;
    let cutoff_ms = now_ms.saturating_sub(hours.saturating_mul(MILLIS_PER_HOUR));

    let removed = store.cleanup_older_than(cutoff_ms).await?;
    info!(cutoff_ms, removed, "Purged expired attempts");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use steadycall_core::{AttemptRecord, AttemptSink, RetryAttempt};

    use super::*;
    use crate::memory_store::InMemoryAttemptStore;

    fn attempt_at(timestamp_ms: i64) -> AttemptRecord {
        AttemptRecord {
            service_name: "search".into(),
            operation_id: "op".into(),
            success: true,
            attempt: RetryAttempt {
                attempt_number: 1,
                delay_ms: 0,
                timestamp_ms,
                error: None,
                failure_kind: None,
                response_time_ms: 3,
            },
        }
    }

    #[tokio::test]
    async fn purge_respects_retention() {
        let store = InMemoryAttemptStore::new();
        store.record_attempt(attempt_at(0)).await.expect("record");
        store.record_attempt(attempt_at(5 * MILLIS_PER_HOUR)).await.expect("record");
        let storage = StorageConfig { retention_hours: Some(2), ..StorageConfig::default() };

        let removed = purge_expired(&store, &storage, 6 * MILLIS_PER_HOUR).await.expect("purge");

        assert_eq!(removed, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn purge_without_retention_is_noop() {
        let store = InMemoryAttemptStore::new();
        store.record_attempt(attempt_at(0)).await.expect("record");
        let storage = StorageConfig { retention_hours: None, ..StorageConfig::default() };

        assert_eq!(purge_expired(&store, &storage, i64::MAX).await.expect("purge"), 0);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn storage_disabled_builds_plain_executor() {
        let executor = build_executor(&AppConfig::default()).expect("executor");
        assert_eq!(executor.config(), &AppConfig::default().engine);
    }
}
