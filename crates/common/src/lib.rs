//! Foundation primitives shared by the steadycall crates.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: failure classification (no async runtime, no logging)
//! - `runtime`: clock, circuit breaker, bulkhead, adaptive window and retry
//!   policy (tokio, tracing, dashmap)

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod failure;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod resilience;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "foundation")]
pub use failure::{classify, classify_text, FailureKind};
#[cfg(feature = "runtime")]
pub use resilience::{
    AdaptiveConfig, AdaptiveDelayCalculator, Bulkhead, BulkheadConfig, BulkheadPermit, CallGrant,
    CircuitBreaker, CircuitBreakerConfig, CircuitState, Clock, ConfigError, ConfigResult,
    MockClock, RetryConfig, RetryStrategy, SystemClock,
};
