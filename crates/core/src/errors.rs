//! Error types used throughout the engine

use serde::{Deserialize, Serialize};
use steadycall_common::resilience::ConfigError;
use thiserror::Error;

/// Main error type for steadycall
///
/// Execution outcomes (fail-fast, circuit-open, exhausted) are never errors;
/// they are reported through `RetryResult::decision`. This type covers the
/// surrounding machinery: configuration, persistence and admin queries.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum SteadycallError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ConfigError> for SteadycallError {
    fn from(error: ConfigError) -> Self {
        SteadycallError::Config(error.to_string())
    }
}

/// Result type alias for steadycall operations
pub type Result<T> = std::result::Result<T, SteadycallError>;
