//! # Steadycall Core
//!
//! Retry orchestration over the resilience primitives in `steadycall-common`.
//!
//! This crate contains:
//! - The retry executor and its per-service registry
//! - Attempt persistence ports (traits)
//! - Metrics and status projections
//! - The configuration model
//!
//! ## Architecture Principles
//! - Only depends on `steadycall-common`
//! - No database, file or environment access
//! - Persistence via the [`AttemptSink`] and [`AttemptStore`] traits

pub mod config;
pub mod errors;
pub mod metrics;
pub mod ports;
pub mod retry;

pub use config::{AppConfig, EngineConfig, LogFormat, LoggingConfig, ServiceOverrides, StorageConfig};
pub use errors::{Result, SteadycallError};
pub use metrics::{MetricsSource, ResilienceMonitor, ServiceMetrics, SystemStatus};
pub use ports::{AttemptRecord, AttemptSink, AttemptStats, AttemptStore, LoggingAttemptSink};
pub use retry::{
    AsyncOperation, AttemptError, BlockingOperation, ExecuteOptions, ExecutionDecision,
    ExecutionError, Operation, RetryAttempt, RetryDecision, RetryExecutor, RetryResult,
    ServiceRegistry,
};
pub use steadycall_common::failure::FailureKind;
pub use steadycall_common::resilience::{CircuitBreakerConfig, CircuitState, RetryConfig, RetryStrategy};
