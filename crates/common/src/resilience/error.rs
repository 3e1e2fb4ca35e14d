//! Validation errors shared by the resilience configuration types.

use thiserror::Error;

/// Configuration rejected by a `validate()` call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

impl ConfigError {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        ConfigError::Invalid { message: message.into() }
    }
}

/// Result type for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;
