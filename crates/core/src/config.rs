//! Configuration model for the engine and its adapters
//!
//! Every struct deserializes with `#[serde(default)]`, so a config file only
//! needs the keys it wants to change. Loading from disk and the environment
//! lives in `steadycall-infra`.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steadycall_common::resilience::{
    AdaptiveConfig, BulkheadConfig, CircuitBreakerConfig, RetryConfig,
};

use crate::errors::{Result, SteadycallError};

/// Top-level application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        self.storage.validate()?;
        Ok(())
    }
}

/// Defaults for every call the executor runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub bulkhead: BulkheadConfig,
    pub adaptive: AdaptiveConfig,
    /// Upper bound on one attempt-sink write
    pub sink_timeout_ms: u64,
    /// Attempt records queued for the sink before new ones are dropped
    pub sink_buffer_size: usize,
    /// Per-service overrides keyed by service name
    pub services: HashMap<String, ServiceOverrides>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
            adaptive: AdaptiveConfig::default(),
            sink_timeout_ms: 500,
            sink_buffer_size: 1024,
            services: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        self.retry.validate()?;
        self.circuit_breaker.validate()?;
        self.bulkhead.validate()?;
        self.adaptive.validate()?;

        if self.sink_timeout_ms == 0 {
            return Err(SteadycallError::Config("sink_timeout_ms must be greater than 0".into()));
        }
        if self.sink_buffer_size == 0 {
            return Err(SteadycallError::Config("sink_buffer_size must be greater than 0".into()));
        }

        for (service, overrides) in &self.services {
            overrides.validate().map_err(|error| {
                SteadycallError::Config(format!("service `{service}`: {error}"))
            })?;
        }
        Ok(())
    }

    pub fn sink_timeout(&self) -> Duration {
        Duration::from_millis(self.sink_timeout_ms)
    }

    /// Retry policy for `service`: its override or the engine default
    pub fn retry_for(&self, service: &str) -> &RetryConfig {
        self.services
            .get(service)
            .and_then(|overrides| overrides.retry.as_ref())
            .unwrap_or(&self.retry)
    }

    /// Breaker settings for `service`: its override or the engine default
    pub fn circuit_breaker_for(&self, service: &str) -> &CircuitBreakerConfig {
        self.services
            .get(service)
            .and_then(|overrides| overrides.circuit_breaker.as_ref())
            .unwrap_or(&self.circuit_breaker)
    }

    /// Bulkhead size for `service`, falling back to twice the attempt budget
    pub fn bulkhead_size_for(&self, service: &str, max_attempts: u32) -> usize {
        self.services
            .get(service)
            .and_then(|overrides| overrides.bulkhead_max_concurrent_calls)
            .or(self.bulkhead.max_concurrent_calls)
            .unwrap_or_else(|| (max_attempts as usize).saturating_mul(2).max(1))
    }
}

/// Settings that replace the engine defaults for one service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceOverrides {
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub bulkhead_max_concurrent_calls: Option<usize>,
}

impl ServiceOverrides {
    pub fn validate(&self) -> Result<()> {
        if let Some(retry) = &self.retry {
            retry.validate()?;
        }
        if let Some(circuit_breaker) = &self.circuit_breaker {
            circuit_breaker.validate()?;
        }
        if self.bulkhead_max_concurrent_calls == Some(0) {
            return Err(SteadycallError::Config(
                "bulkhead_max_concurrent_calls must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Attempt persistence settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Persist attempts to SQLite
    pub enabled: bool,
    pub path: PathBuf,
    pub pool_size: u32,
    /// Attempts older than this are purged by retention cleanup
    pub retention_hours: Option<u64>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            path: PathBuf::from("steadycall.db"),
            pool_size: 4,
            retention_hours: Some(24 * 7),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(SteadycallError::Config("storage pool_size must be greater than 0".into()));
        }
        if self.enabled && self.path.as_os_str().is_empty() {
            return Err(SteadycallError::Config("storage path must not be empty".into()));
        }
        Ok(())
    }
}

/// Output format for log lines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per line
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = SteadycallError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(SteadycallError::Config(format!("unknown log format: {other}"))),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: LogFormat::Pretty }
    }
}

#[cfg(test)]
mod tests {
    use steadycall_common::resilience::RetryStrategy;

    use super::*;

    /// Validates the default configuration passes validation.
    ///
    /// Assertions:
    /// - Confirms `AppConfig::default().validate()` succeeds.
    #[test]
    fn test_defaults_are_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    /// Validates the sink queue needs room for at least one record.
    ///
    /// Assertions:
    /// - Confirms a zero `sink_buffer_size` is rejected.
    #[test]
    fn test_zero_sink_buffer_rejected() {
        let engine = EngineConfig { sink_buffer_size: 0, ..EngineConfig::default() };
        assert!(engine.validate().is_err());
    }

    /// Validates override resolution for retry, breaker and bulkhead.
    ///
    /// Assertions:
    /// - Confirms an overridden service gets its own settings.
    /// - Confirms other services fall back to the engine defaults.
    /// - Confirms the bulkhead falls back to twice the attempt budget.
    #[test]
    fn test_service_overrides() {
        let mut engine = EngineConfig::default();
        let custom_retry = RetryConfig { max_attempts: 7, ..RetryConfig::default() };
        engine.services.insert(
            "billing".into(),
            ServiceOverrides {
                retry: Some(custom_retry.clone()),
                circuit_breaker: None,
                bulkhead_max_concurrent_calls: Some(12),
            },
        );

        assert_eq!(engine.retry_for("billing"), &custom_retry);
        assert_eq!(engine.retry_for("search"), &engine.retry);
        assert_eq!(engine.circuit_breaker_for("billing"), &engine.circuit_breaker);
        assert_eq!(engine.bulkhead_size_for("billing", 3), 12);
        assert_eq!(engine.bulkhead_size_for("search", 3), 6);

        engine.bulkhead.max_concurrent_calls = Some(4);
        assert_eq!(engine.bulkhead_size_for("search", 3), 4);
    }

    /// Validates invalid overrides are reported with the service name.
    ///
    /// Assertions:
    /// - Confirms the error mentions the offending service.
    #[test]
    fn test_invalid_override_names_service() {
        let mut engine = EngineConfig::default();
        engine.services.insert(
            "search".into(),
            ServiceOverrides { bulkhead_max_concurrent_calls: Some(0), ..Default::default() },
        );

        let error = engine.validate().expect_err("zero bulkhead must be rejected");
        assert!(error.to_string().contains("search"));
    }

    /// Validates partial JSON documents fill in defaults.
    ///
    /// Assertions:
    /// - Confirms unspecified fields keep their defaults.
    #[test]
    fn test_partial_json() {
        let json = r#"{"engine": {"retry": {"max_attempts": 5, "strategy": "fibonacci"}},
                       "logging": {"format": "json"}}"#;
        let config: AppConfig = serde_json::from_str(json).expect("partial config parses");

        assert_eq!(config.engine.retry.max_attempts, 5);
        assert_eq!(config.engine.retry.strategy, RetryStrategy::Fibonacci);
        assert_eq!(config.engine.retry.base_delay_ms, RetryConfig::default().base_delay_ms);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.storage, StorageConfig::default());
    }

    /// Validates log format parsing.
    ///
    /// Assertions:
    /// - Confirms accepted spellings and rejection of unknown formats.
    #[test]
    fn test_log_format_from_str() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }
}
