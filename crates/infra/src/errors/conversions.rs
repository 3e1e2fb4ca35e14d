//! Conversions from external infrastructure errors into engine errors.

use r2d2::Error as PoolError;
use rusqlite::Error as SqlError;
use steadycall_core::SteadycallError;
use tokio::task::JoinError;
use tracing::warn;

/// Error newtype that keeps conversions on the infrastructure side and can be
/// converted back into the engine error.
#[derive(Debug)]
pub struct InfraError(pub SteadycallError);

impl From<InfraError> for SteadycallError {
    fn from(value: InfraError) -> Self {
        value.0
    }
}

impl From<SteadycallError> for InfraError {
    fn from(value: SteadycallError) -> Self {
        InfraError(value)
    }
}

trait IntoSteadycallError {
    fn into_steadycall(self) -> SteadycallError;
}

/* -------------------------------------------------------------------------- */
/* rusqlite::Error → SteadycallError */
/* -------------------------------------------------------------------------- */

impl IntoSteadycallError for SqlError {
    fn into_steadycall(self) -> SteadycallError {
        use rusqlite::ffi::ErrorCode;
        use rusqlite::Error as RE;

        match self {
            RE::SqliteFailure(err, maybe_message) => {
                let message = maybe_message.unwrap_or_default();
                match err.code {
                    ErrorCode::DatabaseBusy => SteadycallError::Database("database is busy".into()),
                    ErrorCode::DatabaseLocked => {
                        SteadycallError::Database("database is locked".into())
                    }
                    ErrorCode::ConstraintViolation => {
                        SteadycallError::Database(format!("constraint violation: {message}"))
                    }
                    ErrorCode::CannotOpen => {
                        SteadycallError::Database(format!("unable to open database: {message}"))
                    }
                    _ => SteadycallError::Database(format!(
                        "sqlite failure {:?} (code {}): {}",
                        err.code, err.extended_code, message
                    )),
                }
            }
            RE::QueryReturnedNoRows => {
                SteadycallError::NotFound("no rows returned by query".into())
            }
            RE::FromSqlConversionFailure(column, _, cause) => SteadycallError::Database(format!(
                "failed to convert sqlite value in column {column}: {cause}"
            )),
            RE::InvalidColumnType(_, name, ty) => {
                SteadycallError::Database(format!("invalid column type for `{name}`: {ty}"))
            }
            other => SteadycallError::Database(other.to_string()),
        }
    }
}

impl From<SqlError> for InfraError {
    fn from(value: SqlError) -> Self {
        InfraError(value.into_steadycall())
    }
}

/* -------------------------------------------------------------------------- */
/* r2d2::Error → SteadycallError */
/* -------------------------------------------------------------------------- */

impl From<PoolError> for InfraError {
    fn from(value: PoolError) -> Self {
        InfraError(SteadycallError::Database(format!("connection pool error: {value}")))
    }
}

/* -------------------------------------------------------------------------- */
/* tokio::task::JoinError → SteadycallError */
/* -------------------------------------------------------------------------- */

impl From<JoinError> for InfraError {
    fn from(value: JoinError) -> Self {
        let reason = if value.is_panic() { "panicked" } else { "was cancelled" };
        InfraError(SteadycallError::Internal(format!("blocking database task {reason}")))
    }
}

/// Map a rusqlite error, logging it at the mapping site
pub(crate) fn map_sql_error(err: SqlError) -> SteadycallError {
    warn!(error = %err, "SQLite error");
    InfraError::from(err).into()
}

/// Map a pool checkout error, logging it at the mapping site
pub(crate) fn map_pool_error(err: PoolError) -> SteadycallError {
    warn!(error = %err, "SQLite pool error");
    InfraError::from(err).into()
}

/// Map a blocking-task join error, logging it at the mapping site
pub(crate) fn map_join_error(err: JoinError) -> SteadycallError {
    warn!(error = %err, "Database task join error");
    InfraError::from(err).into()
}

/* -------------------------------------------------------------------------- */
/* Tests */
/* -------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use rusqlite::ffi::{Error as FfiError, ErrorCode};

    use super::*;

    #[test]
    fn sqlite_busy_maps_to_database_error() {
        let err = SqlError::SqliteFailure(
            FfiError { code: ErrorCode::DatabaseBusy, extended_code: 5 },
            Some("database is locked".into()),
        );

        match SteadycallError::from(InfraError::from(err)) {
            SteadycallError::Database(msg) => assert!(msg.contains("busy")),
            other => panic!("expected database error, got {other:?}"),
        }
    }

    #[test]
    fn no_rows_maps_to_not_found() {
        let mapped = map_sql_error(SqlError::QueryReturnedNoRows);
        assert!(matches!(mapped, SteadycallError::NotFound(_)));
    }

    #[tokio::test]
    async fn panicked_task_maps_to_internal() {
        let join_error = tokio::task::spawn_blocking(|| panic!("boom"))
            .await
            .expect_err("task should panic");

        match map_join_error(join_error) {
            SteadycallError::Internal(msg) => assert!(msg.contains("panicked")),
            other => panic!("expected internal error, got {other:?}"),
        }
    }
}
