//! Per-service circuit breaker
//!
//! A breaker tracks a sliding window of call outcomes for one downstream
//! service and moves between three states:
//!
//! - **Closed**: calls flow. The breaker opens once consecutive failures reach
//!   `failure_threshold`, or once the window holds at least
//!   `minimum_throughput` samples and its failure rate reaches
//!   `error_percentage_threshold`.
//! - **Open**: calls are rejected until `timeout_ms` has passed since the last
//!   failure, then the breaker moves to half-open.
//! - **HalfOpen**: up to `half_open_max_calls` trial calls may be in flight.
//!   `success_threshold` consecutive trial successes close the breaker; any
//!   failure reopens it. Calls admitted before the breaker went half-open are
//!   not trial calls.
//!
//! All state lives behind one mutex per breaker so unrelated services never
//! contend with each other.

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::error::{ConfigError, ConfigResult};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Calls are allowed
    Closed,
    /// Calls are rejected
    Open,
    /// A limited number of trial calls are allowed
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Configuration for circuit breaker behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures (while closed) that open the circuit
    pub failure_threshold: u32,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,
    /// Cool-down before an open circuit admits a trial
    pub timeout_ms: u64,
    /// Maximum trial calls in flight while half-open
    pub half_open_max_calls: u32,
    /// Samples required before the failure-rate rule applies
    pub minimum_throughput: u32,
    /// Failure rate (percent) over the window that opens the circuit
    pub error_percentage_threshold: f64,
    /// Number of outcomes kept in the sliding window
    pub sliding_window_size: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 3,
            timeout_ms: 60_000,
            half_open_max_calls: 3,
            minimum_throughput: 10,
            error_percentage_threshold: 50.0,
            sliding_window_size: 100,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a configuration builder
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Create a configuration builder (alias for `new()`)
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::new()
    }

    /// Cool-down as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold must be greater than 0"));
        }

        if self.success_threshold == 0 {
            return Err(ConfigError::invalid("success_threshold must be greater than 0"));
        }

        if self.half_open_max_calls == 0 {
            return Err(ConfigError::invalid("half_open_max_calls must be greater than 0"));
        }

        if self.sliding_window_size == 0 {
            return Err(ConfigError::invalid("sliding_window_size must be greater than 0"));
        }

        if !(self.error_percentage_threshold > 0.0 && self.error_percentage_threshold <= 100.0) {
            return Err(ConfigError::invalid(
                "error_percentage_threshold must be in the range (0, 100]",
            ));
        }

        Ok(())
    }
}

/// Builder for [`CircuitBreakerConfig`]
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn new() -> Self {
        Self { config: CircuitBreakerConfig::default() }
    }

    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn half_open_max_calls(mut self, max_calls: u32) -> Self {
        self.config.half_open_max_calls = max_calls;
        self
    }

    pub fn minimum_throughput(mut self, samples: u32) -> Self {
        self.config.minimum_throughput = samples;
        self
    }

    pub fn error_percentage_threshold(mut self, percent: f64) -> Self {
        self.config.error_percentage_threshold = percent;
        self
    }

    pub fn sliding_window_size(mut self, size: usize) -> Self {
        self.config.sliding_window_size = size;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of one breaker, safe to serialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSnapshot {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_calls: u32,
    pub total_calls: u64,
    pub rejected_calls: u64,
    pub window_samples: usize,
    /// Failure percentage over the sliding window (0 when empty)
    pub window_failure_rate: f64,
    /// Milliseconds since the last recorded failure
    pub last_failure_ms_ago: Option<u64>,
    /// Milliseconds until an open breaker admits a trial
    pub retry_after_ms: Option<u64>,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    half_open_calls: u32,
    total_calls: u64,
    rejected_calls: u64,
    last_failure_time: Option<Instant>,
    /// Bumped on every entry into half-open
    trial_episode: u64,
    /// Outcomes in completion order, `true` for success
    call_history: VecDeque<bool>,
}

impl BreakerInner {
    fn new(window: usize) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            half_open_calls: 0,
            total_calls: 0,
            rejected_calls: 0,
            last_failure_time: None,
            trial_episode: 0,
            call_history: VecDeque::with_capacity(window),
        }
    }

    fn push_outcome(&mut self, success: bool, window: usize) {
        self.call_history.push_back(success);
        while self.call_history.len() > window {
            self.call_history.pop_front();
        }
    }

    fn window_failure_rate(&self) -> f64 {
        if self.call_history.is_empty() {
            return 0.0;
        }
        let failures = self.call_history.iter().filter(|success| !**success).count();
        failures as f64 * 100.0 / self.call_history.len() as f64
    }

    /// Whether an outcome belongs to a trial of the current half-open episode.
    /// Outcomes reported without a grant are taken as such.
    fn is_current_trial(&self, grant: Option<CallGrant>) -> bool {
        grant.map_or(true, |grant| grant.trial_episode == Some(self.trial_episode))
    }

    fn transition(&mut self, to: CircuitState, now: Instant) {
        self.state = to;
        match to {
            CircuitState::Open => {
                self.success_count = 0;
                self.half_open_calls = 0;
                self.last_failure_time = Some(now);
            }
            CircuitState::HalfOpen => {
                self.success_count = 0;
                self.half_open_calls = 0;
                self.trial_episode += 1;
            }
            CircuitState::Closed => {
                self.failure_count = 0;
                self.success_count = 0;
                self.half_open_calls = 0;
            }
        }
    }
}

/// Permission for one call, handed out by [`CircuitBreaker::admit`].
///
/// Reporting the outcome with the grant lets the breaker tell half-open
/// trial calls apart from calls that were admitted while it was still closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "report the outcome or release the grant"]
pub struct CallGrant {
    trial_episode: Option<u64>,
}

impl CallGrant {
    /// Whether this call occupies a half-open trial slot
    pub fn is_trial(&self) -> bool {
        self.trial_episode.is_some()
    }
}

/// Circuit breaker for a single named service.
pub struct CircuitBreaker<C: Clock = SystemClock> {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreaker<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &inner.state)
            .field("failure_count", &inner.failure_count)
            .field("success_count", &inner.success_count)
            .finish_non_exhaustive()
    }
}

impl CircuitBreaker<SystemClock> {
    /// Create a breaker driven by the system clock
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, SystemClock)
    }
}

impl<C: Clock> CircuitBreaker<C> {
    /// Create a breaker with a custom clock (useful for testing)
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: C,
    ) -> ConfigResult<Self> {
        config.validate()?;
        let inner = BreakerInner::new(config.sliding_window_size);
        Ok(Self { name: name.into(), config, inner: Mutex::new(inner), clock })
    }

    /// Service this breaker protects
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Ask for permission to run one call.
    ///
    /// Shorthand for [`admit`](Self::admit) when the caller reports outcomes
    /// without a grant.
    pub fn can_execute(&self) -> bool {
        self.admit().is_some()
    }

    /// Ask for permission to run one call and get a grant for it.
    ///
    /// An open breaker whose cool-down has elapsed moves to half-open and
    /// grants the trial. In half-open every granted call occupies one of the
    /// `half_open_max_calls` slots until its outcome is recorded or the grant
    /// is released.
    pub fn admit(&self) -> Option<CallGrant> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();

        let grant = match inner.state {
            CircuitState::Closed => Some(CallGrant { trial_episode: None }),
            CircuitState::Open => {
                let cooled_down = inner.last_failure_time.map_or(true, |failed_at| {
                    now.saturating_duration_since(failed_at) >= self.config.timeout()
                });
                if cooled_down {
                    inner.transition(CircuitState::HalfOpen, now);
                    inner.half_open_calls = 1;
                    info!(service = %self.name, "Circuit breaker half-open, admitting trial");
                    Some(CallGrant { trial_episode: Some(inner.trial_episode) })
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_calls < self.config.half_open_max_calls {
                    inner.half_open_calls += 1;
                    Some(CallGrant { trial_episode: Some(inner.trial_episode) })
                } else {
                    None
                }
            }
        };

        if grant.is_some() {
            inner.total_calls += 1;
        } else {
            inner.rejected_calls += 1;
            debug!(service = %self.name, state = %inner.state, "Circuit breaker rejecting call");
        }
        grant
    }

    /// Record a successful call
    pub fn record_success(&self) {
        self.on_success(None);
    }

    /// Record a successful call admitted with `grant`
    pub fn record_success_for(&self, grant: CallGrant) {
        self.on_success(Some(grant));
    }

    /// Record a failed call
    pub fn record_failure(&self) {
        self.on_failure();
    }

    /// Record a failed call admitted with `grant`
    ///
    /// Any failure reopens a half-open breaker, trial or not.
    pub fn record_failure_for(&self, _grant: CallGrant) {
        self.on_failure();
    }

    fn on_success(&self, grant: Option<CallGrant>) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.push_outcome(true, self.config.sliding_window_size);

        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen if !inner.is_current_trial(grant) => {
                debug!(service = %self.name, "Non-trial success ignored while half-open");
            }
            CircuitState::HalfOpen => {
                inner.success_count += 1;
                inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
                if inner.success_count >= self.config.success_threshold {
                    let successes = inner.success_count;
                    inner.transition(CircuitState::Closed, now);
                    info!(service = %self.name, successes, "Circuit breaker closed");
                }
            }
            CircuitState::Open => {
                debug!(service = %self.name, "Success recorded while circuit is open");
            }
        }
    }

    fn on_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.push_outcome(false, self.config.sliding_window_size);
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(now);

        match inner.state {
            CircuitState::Closed => {
                let by_count = inner.failure_count >= self.config.failure_threshold;
                let by_rate = inner.call_history.len() >= self.config.minimum_throughput as usize
                    && inner.window_failure_rate() >= self.config.error_percentage_threshold;

                if by_count || by_rate {
                    let failures = inner.failure_count;
                    let failure_rate = inner.window_failure_rate();
                    inner.transition(CircuitState::Open, now);
                    warn!(
                        service = %self.name,
                        failures,
                        failure_rate,
                        "Circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.transition(CircuitState::Open, now);
                warn!(service = %self.name, "Circuit breaker reopened after half-open failure");
            }
            CircuitState::Open => {}
        }
    }

    /// Give back a grant whose call never ran.
    ///
    /// Frees the half-open slot without recording an outcome. No-op for
    /// grants that are not trial calls of the current half-open episode.
    pub fn release(&self, grant: CallGrant) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen
            && grant.is_trial()
            && inner.is_current_trial(Some(grant))
        {
            inner.half_open_calls = inner.half_open_calls.saturating_sub(1);
        }
    }

    /// Current state without side effects
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Serializable view of the breaker
    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let now = self.clock.now();
        let inner = self.inner.lock();

        let since_failure = inner.last_failure_time.map(|at| now.saturating_duration_since(at));
        let retry_after_ms = match (inner.state, since_failure) {
            (CircuitState::Open, Some(elapsed)) => {
                Some(duration_millis(self.config.timeout().saturating_sub(elapsed)))
            }
            _ => None,
        };

        CircuitBreakerSnapshot {
            service_name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            half_open_calls: inner.half_open_calls,
            total_calls: inner.total_calls,
            rejected_calls: inner.rejected_calls,
            window_samples: inner.call_history.len(),
            window_failure_rate: inner.window_failure_rate(),
            last_failure_ms_ago: since_failure.map(duration_millis),
            retry_after_ms,
        }
    }

    /// Force the breaker back to closed with empty counters and window
    pub fn reset(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        inner.transition(CircuitState::Closed, now);
        inner.last_failure_time = None;
        inner.call_history.clear();
        info!(service = %self.name, "Circuit breaker manually reset to closed state");
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    //! Unit tests for the breaker state machine
    //!
    //! Time-dependent transitions are driven through `MockClock`.

    use std::sync::Arc;
    use std::thread;

    use super::*;
    use crate::resilience::clock::MockClock;

    fn breaker(config: CircuitBreakerConfig) -> (CircuitBreaker<MockClock>, MockClock) {
        let clock = MockClock::new();
        let breaker = CircuitBreaker::with_clock("payments", config, clock.clone())
            .expect("valid breaker config");
        (breaker, clock)
    }

    fn count_only_config() -> CircuitBreakerConfig {
        CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .timeout(Duration::from_millis(1_000))
            .half_open_max_calls(1)
            .minimum_throughput(1_000)
            .build()
            .expect("valid breaker config")
    }

    // =========================================================================
    // Config Tests
    // =========================================================================

    /// Validates `CircuitBreakerConfig::validate` rejects degenerate values.
    ///
    /// Assertions:
    /// - Confirms zero thresholds and out-of-range percentages fail.
    /// - Confirms the default configuration passes.
    #[test]
    fn test_config_validation() {
        assert!(CircuitBreakerConfig::default().validate().is_ok());
        assert!(CircuitBreakerConfig::builder().failure_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().success_threshold(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().half_open_max_calls(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().sliding_window_size(0).build().is_err());
        assert!(CircuitBreakerConfig::builder().error_percentage_threshold(0.0).build().is_err());
        assert!(CircuitBreakerConfig::builder().error_percentage_threshold(120.0).build().is_err());
    }

    /// Validates the display strings used in logs and snapshots.
    ///
    /// Assertions:
    /// - Confirms each state renders in upper snake case.
    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "CLOSED");
        assert_eq!(CircuitState::Open.to_string(), "OPEN");
        assert_eq!(CircuitState::HalfOpen.to_string(), "HALF_OPEN");
    }

    // =========================================================================
    // State Machine Tests
    // =========================================================================

    /// Validates the breaker opens after exactly `failure_threshold` failures
    /// and only admits a trial once the cool-down has elapsed.
    ///
    /// Assertions:
    /// - Confirms the state stays closed below the threshold.
    /// - Confirms `can_execute()` is false before the timeout.
    /// - Confirms exactly one trial is admitted after the timeout.
    #[test]
    fn test_opens_on_failure_threshold() {
        let (breaker, clock) = breaker(count_only_config());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.can_execute());

        clock.advance_millis(999);
        assert!(!breaker.can_execute());

        clock.advance_millis(1);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(!breaker.can_execute(), "only one trial while it is in flight");
    }

    /// Validates a success in the closed state clears the failure streak.
    ///
    /// Assertions:
    /// - Confirms interleaved successes keep the breaker closed.
    #[test]
    fn test_success_resets_failure_streak() {
        let (breaker, _clock) = breaker(count_only_config());

        for _ in 0..5 {
            breaker.record_failure();
            breaker.record_failure();
            breaker.record_success();
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.snapshot().failure_count, 0);
    }

    /// Validates the failure-rate rule over the sliding window.
    ///
    /// Assertions:
    /// - Confirms the breaker stays closed until `minimum_throughput` samples.
    /// - Confirms it opens once the rate crosses the threshold.
    #[test]
    fn test_opens_on_error_percentage() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(100)
            .minimum_throughput(4)
            .error_percentage_threshold(50.0)
            .sliding_window_size(10)
            .build()
            .expect("valid breaker config");
        let (breaker, _clock) = breaker(config);

        breaker.record_success();
        breaker.record_failure();
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed, "below minimum throughput");

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!((breaker.snapshot().window_failure_rate - 50.0).abs() < f64::EPSILON);
    }

    /// Validates the sliding window is trimmed to its configured size.
    ///
    /// Assertions:
    /// - Confirms the window never holds more than `sliding_window_size`.
    #[test]
    fn test_window_is_bounded() {
        let config = CircuitBreakerConfig::builder()
            .sliding_window_size(5)
            .build()
            .expect("valid breaker config");
        let (breaker, _clock) = breaker(config);

        for _ in 0..20 {
            breaker.record_success();
        }

        assert_eq!(breaker.snapshot().window_samples, 5);
    }

    /// Validates recovery from half-open after consecutive successes.
    ///
    /// Assertions:
    /// - Confirms the breaker stays half-open after one success.
    /// - Confirms it closes with zero failures after `success_threshold`.
    #[test]
    fn test_half_open_recovery() {
        let (breaker, clock) = breaker(count_only_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_millis(1_000);

        assert!(breaker.can_execute());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        assert!(breaker.can_execute());
        breaker.record_success();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.half_open_calls, 0);
    }

    /// Validates a half-open failure reopens the breaker and restarts the
    /// cool-down.
    ///
    /// Assertions:
    /// - Confirms the state returns to open.
    /// - Confirms calls are rejected until another full timeout passes.
    #[test]
    fn test_half_open_failure_reopens() {
        let (breaker, clock) = breaker(count_only_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_millis(1_000);
        assert!(breaker.can_execute());

        breaker.record_failure();

        assert_eq!(breaker.state(), CircuitState::Open);
        clock.advance_millis(500);
        assert!(!breaker.can_execute());
        assert_eq!(breaker.snapshot().retry_after_ms, Some(500));
        clock.advance_millis(500);
        assert!(breaker.can_execute());
    }

    /// Validates `reset` forces the closed state and clears history.
    ///
    /// Assertions:
    /// - Confirms the state, counters and window are cleared.
    #[test]
    fn test_reset() {
        let (breaker, _clock) = breaker(count_only_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        breaker.reset();

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.failure_count, 0);
        assert_eq!(snapshot.window_samples, 0);
        assert!(breaker.can_execute());
    }

    /// Validates a released trial frees its half-open slot.
    ///
    /// Assertions:
    /// - Confirms the slot can be granted again without any outcome recorded.
    #[test]
    fn test_release_frees_half_open_slot() {
        let (breaker, clock) = breaker(count_only_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_millis(1_000);

        let trial = breaker.admit().expect("trial admitted after cool-down");
        assert!(trial.is_trial());
        assert!(breaker.admit().is_none());

        breaker.release(trial);

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(breaker.can_execute());
    }

    /// Validates that calls admitted while closed do not count as trial calls.
    ///
    /// # Test Steps
    /// 1. Admit a call while closed and keep it in flight
    /// 2. Trip the breaker and let it cool down into half-open
    /// 3. Report the closed-era call as a success
    ///
    /// Assertions:
    /// - Confirms the late success neither frees the trial slot nor closes
    ///   the breaker.
    /// - Confirms the real trial's success closes it.
    #[test]
    fn test_closed_grant_success_is_not_a_trial() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .success_threshold(1)
            .half_open_max_calls(1)
            .timeout(Duration::from_millis(100))
            .build()
            .expect("valid breaker config");
        let (breaker, clock) = breaker(config);

        let in_flight = breaker.admit().expect("closed breaker admits");
        assert!(!in_flight.is_trial());
        breaker.record_failure();
        clock.advance_millis(100);
        let trial = breaker.admit().expect("trial admitted");

        breaker.record_success_for(in_flight);

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.snapshot().half_open_calls, 1);
        assert!(breaker.admit().is_none());

        breaker.record_success_for(trial);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    /// Validates trial calls from an earlier half-open episode are stale.
    ///
    /// Assertions:
    /// - Confirms releasing a stale trial leaves the new episode's slot taken.
    #[test]
    fn test_stale_trial_release_is_ignored() {
        let (breaker, clock) = breaker(count_only_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        clock.advance_millis(1_000);
        let first = breaker.admit().expect("first trial");
        breaker.record_failure();
        clock.advance_millis(1_000);
        let _second = breaker.admit().expect("second trial");

        breaker.release(first);

        assert_eq!(breaker.snapshot().half_open_calls, 1);
        assert!(breaker.admit().is_none());
    }

    /// Validates rejected calls are counted separately.
    ///
    /// Assertions:
    /// - Confirms `total_calls` and `rejected_calls` track decisions.
    #[test]
    fn test_call_counters() {
        let (breaker, _clock) = breaker(count_only_config());
        assert!(breaker.can_execute());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert!(!breaker.can_execute());
        assert!(!breaker.can_execute());

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.total_calls, 1);
        assert_eq!(snapshot.rejected_calls, 2);
    }

    // =========================================================================
    // Concurrency Tests
    // =========================================================================

    /// Validates the half-open slot limit under concurrent callers.
    ///
    /// Assertions:
    /// - Confirms no more than `half_open_max_calls` trial calls are granted.
    #[test]
    fn test_half_open_limit_across_threads() {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .half_open_max_calls(3)
            .timeout(Duration::from_millis(10))
            .build()
            .expect("valid breaker config");
        let clock = MockClock::new();
        let breaker = Arc::new(
            CircuitBreaker::with_clock("search", config, clock.clone()).expect("valid breaker"),
        );
        breaker.record_failure();
        clock.advance_millis(10);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let breaker = Arc::clone(&breaker);
                thread::spawn(move || breaker.can_execute())
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|handle| handle.join().expect("thread should not panic"))
            .filter(|granted| *granted)
            .count();

        assert_eq!(granted, 3);
        assert!(breaker.snapshot().half_open_calls <= 3);
    }
}
