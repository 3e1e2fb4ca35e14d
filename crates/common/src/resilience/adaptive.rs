//! Adaptive backoff from observed service health
//!
//! Keeps a rolling window of recent outcomes and response times per service
//! and scales a base delay by how unhealthy and how slow the service looks:
//!
//! ```text
//! delay = base * (2.0 - success_rate) * min(avg_response_ms / 1000, cap)
//! ```
//!
//! capped at `max_delay_ms`. A service with no history gets the base delay
//! unchanged.

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::error::{ConfigError, ConfigResult};

/// Tuning for the adaptive calculator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Samples kept per service
    pub window_size: usize,
    /// Ceiling for computed delays
    pub max_delay_ms: u64,
    /// Ceiling for the response-time factor
    pub max_response_time_multiplier: f64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self { window_size: 100, max_delay_ms: 300_000, max_response_time_multiplier: 3.0 }
    }
}

impl AdaptiveConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.window_size == 0 {
            return Err(ConfigError::invalid("adaptive window_size must be greater than 0"));
        }
        if !self.max_response_time_multiplier.is_finite() || self.max_response_time_multiplier <= 0.0
        {
            return Err(ConfigError::invalid(
                "max_response_time_multiplier must be a positive number",
            ));
        }
        Ok(())
    }
}

/// Aggregates over one service's window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdaptiveStats {
    pub samples: usize,
    pub successes: usize,
    /// Fraction of successful samples in `[0, 1]`
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    success: bool,
    response_time_ms: u64,
}

/// Per-service rolling health windows
#[derive(Debug, Default)]
pub struct AdaptiveDelayCalculator {
    config: AdaptiveConfig,
    windows: DashMap<String, VecDeque<Sample>>,
}

impl AdaptiveDelayCalculator {
    pub fn new(config: AdaptiveConfig) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { config, windows: DashMap::new() })
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    /// Append one outcome, evicting the oldest beyond the window size
    pub fn update(&self, service: &str, success: bool, response_time_ms: u64) {
        let mut window = self.windows.entry(service.to_string()).or_default();
        window.push_back(Sample { success, response_time_ms });
        while window.len() > self.config.window_size {
            window.pop_front();
        }
    }

    /// Window aggregates, or `None` before the first sample
    pub fn stats(&self, service: &str) -> Option<AdaptiveStats> {
        let window = self.windows.get(service)?;
        if window.is_empty() {
            return None;
        }

        let samples = window.len();
        let successes = window.iter().filter(|sample| sample.success).count();
        let total_response: u64 = window.iter().map(|sample| sample.response_time_ms).sum();

        Some(AdaptiveStats {
            samples,
            successes,
            success_rate: successes as f64 / samples as f64,
            avg_response_time_ms: total_response as f64 / samples as f64,
        })
    }

    /// Scale `base_delay_ms` by the service's recent health.
    pub fn compute_delay(&self, service: &str, base_delay_ms: u64, attempt: u32) -> u64 {
        let Some(stats) = self.stats(service) else {
            return base_delay_ms;
        };

        let success_multiplier = 2.0 - stats.success_rate;
        let response_multiplier =
            (stats.avg_response_time_ms / 1000.0).min(self.config.max_response_time_multiplier);
        let delay = (base_delay_ms as f64 * success_multiplier * response_multiplier)
            .clamp(0.0, self.config.max_delay_ms as f64);

        debug!(
            service,
            attempt,
            success_rate = stats.success_rate,
            avg_response_time_ms = stats.avg_response_time_ms,
            delay_ms = delay,
            "Computed adaptive delay"
        );
        delay.round() as u64
    }

    /// Drop the window for `service`
    pub fn remove(&self, service: &str) -> bool {
        self.windows.remove(service).is_some()
    }

    /// Services with at least one recorded sample
    pub fn services(&self) -> Vec<String> {
        self.windows.iter().map(|entry| entry.key().clone()).collect()
    }
}
