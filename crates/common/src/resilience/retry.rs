//! Retry policy configuration and backoff calculation
//!
//! [`RetryConfig`] is the per-call policy: attempt budget, per-attempt
//! deadline, backoff strategy and the switches for the breaker, bulkhead and
//! adaptive window. [`calculate_delay`] turns a failed attempt into the
//! pause before the next one:
//!
//! 1. strategy delay (exponential, linear, fixed, fibonacci or adaptive)
//! 2. times the failure kind's multiplier
//! 3. plus symmetric jitter of `jitter_factor / 2` either way
//! 4. clamped to `[0, max_delay_ms]`

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::adaptive::AdaptiveDelayCalculator;
use super::error::{ConfigError, ConfigResult};
use crate::failure::FailureKind;

/// How the base delay grows with the attempt number
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    /// `base * multiplier^(attempt - 1)`
    #[default]
    Exponential,
    /// `base * attempt`
    Linear,
    /// `base`
    Fixed,
    /// `base * fib(attempt)` with `fib(0) = fib(1) = 1`
    Fibonacci,
    /// Scaled by the service's recent success rate and latency
    Adaptive,
}

impl RetryStrategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            RetryStrategy::Exponential => "exponential",
            RetryStrategy::Linear => "linear",
            RetryStrategy::Fixed => "fixed",
            RetryStrategy::Fibonacci => "fibonacci",
            RetryStrategy::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for RetryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryStrategy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "exponential" => Ok(RetryStrategy::Exponential),
            "linear" => Ok(RetryStrategy::Linear),
            "fixed" => Ok(RetryStrategy::Fixed),
            "fibonacci" => Ok(RetryStrategy::Fibonacci),
            "adaptive" => Ok(RetryStrategy::Adaptive),
            other => Err(ConfigError::invalid(format!("unknown retry strategy: {other}"))),
        }
    }
}

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Growth factor for the exponential strategy
    pub backoff_multiplier: f64,
    /// Jitter range as a fraction of the delay, in `[0, 1]`
    pub jitter_factor: f64,
    pub strategy: RetryStrategy,
    /// Deadline for a single attempt
    pub timeout_ms: u64,
    pub circuit_breaker_enabled: bool,
    pub bulkhead_enabled: bool,
    /// Feed outcomes into the adaptive window
    pub adaptive_enabled: bool,
    /// Extra kinds to treat as permanent on top of client and validation
    /// errors
    pub non_retryable_kinds: Vec<FailureKind>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
            strategy: RetryStrategy::Exponential,
            timeout_ms: 30_000,
            circuit_breaker_enabled: true,
            bulkhead_enabled: true,
            adaptive_enabled: true,
            non_retryable_kinds: Vec::new(),
        }
    }
}

impl RetryConfig {
    /// Create a new configuration builder
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Create a configuration builder (alias for `new()`)
    pub fn builder() -> RetryConfigBuilder {
        RetryConfigBuilder::new()
    }

    /// Per-attempt deadline as a [`Duration`]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Whether a failure of `kind` may be retried under this policy
    pub fn is_retryable(&self, kind: FailureKind) -> bool {
        !kind.is_permanent() && !self.non_retryable_kinds.contains(&kind)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts must be at least 1"));
        }

        if self.base_delay_ms > self.max_delay_ms {
            return Err(ConfigError::invalid("base_delay_ms must not exceed max_delay_ms"));
        }

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::invalid("backoff_multiplier must be at least 1.0"));
        }

        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::invalid("jitter_factor must be between 0.0 and 1.0"));
        }

        if self.timeout_ms == 0 {
            return Err(ConfigError::invalid("timeout_ms must be greater than 0"));
        }

        Ok(())
    }
}

/// Builder for [`RetryConfig`] with fluent API
#[derive(Debug, Default)]
pub struct RetryConfigBuilder {
    config: RetryConfig,
}

impl RetryConfigBuilder {
    pub fn new() -> Self {
        Self { config: RetryConfig::default() }
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn base_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.base_delay_ms = delay_ms;
        self
    }

    pub fn max_delay_ms(mut self, delay_ms: u64) -> Self {
        self.config.max_delay_ms = delay_ms;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter_factor(0.0)
    }

    pub fn strategy(mut self, strategy: RetryStrategy) -> Self {
        self.config.strategy = strategy;
        self
    }

    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.config.timeout_ms = timeout_ms;
        self
    }

    pub fn circuit_breaker_enabled(mut self, enabled: bool) -> Self {
        self.config.circuit_breaker_enabled = enabled;
        self
    }

    pub fn bulkhead_enabled(mut self, enabled: bool) -> Self {
        self.config.bulkhead_enabled = enabled;
        self
    }

    pub fn adaptive_enabled(mut self, enabled: bool) -> Self {
        self.config.adaptive_enabled = enabled;
        self
    }

    pub fn non_retryable(mut self, kind: FailureKind) -> Self {
        if !self.config.non_retryable_kinds.contains(&kind) {
            self.config.non_retryable_kinds.push(kind);
        }
        self
    }

    pub fn build(self) -> ConfigResult<RetryConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// `fib(0) = fib(1) = 1`, saturating
pub fn fibonacci(n: u32) -> u64 {
    let (mut previous, mut current) = (1_u64, 1_u64);
    for _ in 1..n {
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

/// Strategy delay in milliseconds before kind scaling and jitter
pub fn strategy_delay_ms(
    config: &RetryConfig,
    attempt: u32,
    adaptive: &AdaptiveDelayCalculator,
    service: &str,
) -> f64 {
    let base = config.base_delay_ms as f64;
    match config.strategy {
        RetryStrategy::Exponential => {
            let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
            base * config.backoff_multiplier.powi(exponent)
        }
        RetryStrategy::Linear => base * f64::from(attempt),
        RetryStrategy::Fixed => base,
        RetryStrategy::Fibonacci => base * fibonacci(attempt) as f64,
        RetryStrategy::Adaptive => {
            adaptive.compute_delay(service, config.base_delay_ms, attempt) as f64
        }
    }
}

/// Delay to sleep after failed attempt number `attempt`
pub fn calculate_delay(
    config: &RetryConfig,
    attempt: u32,
    kind: FailureKind,
    adaptive: &AdaptiveDelayCalculator,
    service: &str,
) -> Duration {
    let jitter_sample = if config.jitter_factor > 0.0 { rand::random::<f64>() } else { 0.5 };
    calculate_delay_with_jitter(config, attempt, kind, adaptive, service, jitter_sample)
}

/// [`calculate_delay`] with an explicit jitter sample in `[0, 1)`
pub fn calculate_delay_with_jitter(
    config: &RetryConfig,
    attempt: u32,
    kind: FailureKind,
    adaptive: &AdaptiveDelayCalculator,
    service: &str,
    jitter_sample: f64,
) -> Duration {
    let scaled = strategy_delay_ms(config, attempt, adaptive, service) * kind.delay_multiplier();
    let jittered = scaled + scaled * config.jitter_factor * (jitter_sample - 0.5);
    let max = config.max_delay_ms as f64;
    let millis = if jittered.is_finite() { jittered.clamp(0.0, max) } else { max };
    Duration::from_millis(millis.round() as u64)
}
