//! SQLite-backed attempt history.

use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Row};
use steadycall_core::retry::RetryAttempt;
use steadycall_core::{
    AttemptRecord, AttemptSink, AttemptStats, AttemptStore, FailureKind, Result, SteadycallError,
};
use tokio::task;
use tracing::debug;

use super::manager::DbManager;
use crate::errors::conversions::{map_join_error, map_sql_error};

const INSERT_SQL: &str = "INSERT INTO retry_attempts (
        service_name, operation_id, attempt_number, success, failure_kind,
        delay_ms, response_time_ms, error_message, timestamp_ms
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const STATS_SQL: &str = "SELECT
        COUNT(*),
        SUM(CASE WHEN success = 1 THEN 1 ELSE 0 END),
        AVG(response_time_ms),
        AVG(delay_ms),
        MAX(attempt_number)
    FROM retry_attempts
    WHERE service_name = ?1 AND timestamp_ms >= ?2";

const RECENT_SQL: &str = "SELECT service_name, operation_id, attempt_number, success, failure_kind,
        delay_ms, response_time_ms, error_message, timestamp_ms
    FROM retry_attempts
    WHERE service_name = ?1
    ORDER BY timestamp_ms DESC, id DESC
    LIMIT ?2";

/// Attempt store over the `retry_attempts` table
///
/// Every query runs on the blocking pool so the executor's runtime threads
/// never wait on SQLite.
#[derive(Clone)]
pub struct SqliteAttemptRepository {
    db: Arc<DbManager>,
}

impl SqliteAttemptRepository {
    pub fn new(db: Arc<DbManager>) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Arc<DbManager> {
        &self.db
    }
}

#[async_trait]
impl AttemptSink for SqliteAttemptRepository {
    async fn record_attempt(&self, record: AttemptRecord) -> Result<()> {
        let db = Arc::clone(&self.db);
        let delay_ms = to_sql_int(record.attempt.delay_ms, "delay_ms")?;
        let response_time_ms = to_sql_int(record.attempt.response_time_ms, "response_time_ms")?;

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute(
                INSERT_SQL,
                params![
                    record.service_name,
                    record.operation_id,
                    record.attempt.attempt_number,
                    record.success,
                    record.attempt.failure_kind.map(FailureKind::as_str),
                    delay_ms,
                    response_time_ms,
                    record.attempt.error,
                    record.attempt.timestamp_ms,
                ],
            )
            .map_err(map_sql_error)?;
            Ok::<_, SteadycallError>(())
        })
        .await
        .map_err(map_join_error)?
    }
}

#[async_trait]
impl AttemptStore for SqliteAttemptRepository {
    async fn service_stats(&self, service_name: &str, since_ms: i64) -> Result<AttemptStats> {
        let db = Arc::clone(&self.db);
        let service = service_name.to_string();

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.query_row(STATS_SQL, params![service, since_ms], |row| {
                let total: i64 = row.get(0)?;
                let successes: Option<i64> = row.get(1)?;
                let max_attempt: Option<i64> = row.get(4)?;
                Ok(AttemptStats {
                    total_attempts: from_sql_int(total, 0)?,
                    successful_attempts: from_sql_int(successes.unwrap_or(0), 1)?,
                    avg_response_time_ms: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    avg_delay_ms: row.get::<_, Option<f64>>(3)?.unwrap_or(0.0),
                    max_attempts_per_operation: u32::try_from(max_attempt.unwrap_or(0))
                        .map_err(|err| conversion_error(4, err))?,
                })
            })
            .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn recent_attempts(
        &self,
        service_name: &str,
        limit: usize,
    ) -> Result<Vec<AttemptRecord>> {
        let db = Arc::clone(&self.db);
        let service = service_name.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            let mut stmt = conn.prepare(RECENT_SQL).map_err(map_sql_error)?;
            let rows = stmt
                .query_map(params![service, limit], map_record_row)
                .map_err(map_sql_error)?;
            rows.collect::<std::result::Result<Vec<_>, _>>().map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)?
    }

    async fn cleanup_older_than(&self, cutoff_ms: i64) -> Result<u64> {
        let db = Arc::clone(&self.db);

        let removed = task::spawn_blocking(move || {
            let conn = db.get_connection()?;
            conn.execute("DELETE FROM retry_attempts WHERE timestamp_ms < ?1", params![cutoff_ms])
                .map_err(map_sql_error)
        })
        .await
        .map_err(map_join_error)??;

        debug!(cutoff_ms, removed, "Purged old attempts");
        Ok(removed as u64)
    }
}

fn map_record_row(row: &Row<'_>) -> rusqlite::Result<AttemptRecord> {
    let failure_kind = row
        .get::<_, Option<String>>(4)?
        .map(|raw| {
            raw.parse::<FailureKind>().map_err(|err| {
                rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err))
            })
        })
        .transpose()?;

    Ok(AttemptRecord {
        service_name: row.get(0)?,
        operation_id: row.get(1)?,
        success: row.get(3)?,
        attempt: RetryAttempt {
            attempt_number: row.get(2)?,
            delay_ms: from_sql_int(row.get(5)?, 5)?,
            response_time_ms: from_sql_int(row.get(6)?, 6)?,
            error: row.get(7)?,
            failure_kind,
            timestamp_ms: row.get(8)?,
        },
    })
}

fn to_sql_int(value: u64, column: &str) -> Result<i64> {
    i64::try_from(value)
        .map_err(|_| SteadycallError::InvalidInput(format!("{column} out of range: {value}")))
}

fn from_sql_int(value: i64, column: usize) -> rusqlite::Result<u64> {
    u64::try_from(value).map_err(|err| conversion_error(column, err))
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Integer, Box::new(err))
}
