//! Resilience primitives for calls to unreliable downstream services
//!
//! Each primitive is keyed to a single named service and is safe to share
//! across tasks and threads:
//! - **Circuit Breaker**: stops calling a service that keeps failing and tries
//!   it again after a cool-down
//! - **Bulkhead**: caps concurrent calls per service with a bounded wait
//! - **Adaptive window**: rolling success rate and latency used to scale
//!   backoff delays
//! - **Retry policy**: attempt budget, deadlines and the backoff strategies
//!
//! Orchestration of these pieces into a retry loop lives in `steadycall-core`.
//!
//! ## Testing
//!
//! Time-dependent behavior goes through the [`Clock`] trait. Tests inject a
//! [`MockClock`] and advance it explicitly instead of sleeping.

pub mod adaptive;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod retry;

pub use adaptive::{AdaptiveConfig, AdaptiveDelayCalculator, AdaptiveStats};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadPermit, BulkheadSnapshot};
pub use circuit_breaker::{
    CallGrant, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder,
    CircuitBreakerSnapshot, CircuitState,
};
pub use clock::{Clock, MockClock, SystemClock};
pub use error::{ConfigError, ConfigResult};
pub use retry::{
    calculate_delay, calculate_delay_with_jitter, fibonacci, strategy_delay_ms, RetryConfig,
    RetryConfigBuilder, RetryStrategy,
};
