//! Attempt records, decisions and the result handed back to callers

use std::error::Error;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use steadycall_common::failure::{classify, FailureKind};
use steadycall_common::resilience::RetryConfig;
use thiserror::Error;

/// One attempt of an execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryAttempt {
    /// 1-based
    pub attempt_number: u32,
    /// Backoff slept after this attempt; 0 when no retry followed
    pub delay_ms: u64,
    /// Wall-clock start of the attempt, milliseconds since the UNIX epoch
    pub timestamp_ms: i64,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub response_time_ms: u64,
}

impl RetryAttempt {
    pub fn succeeded(&self) -> bool {
        self.failure_kind.is_none()
    }
}

/// Terminal outcome of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionDecision {
    Success,
    RetryExhausted,
    CircuitOpen,
    FailFast,
    Cancelled,
}

impl ExecutionDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionDecision::Success => "success",
            ExecutionDecision::RetryExhausted => "retry_exhausted",
            ExecutionDecision::CircuitOpen => "circuit_open",
            ExecutionDecision::FailFast => "fail_fast",
            ExecutionDecision::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Verdict after a single failed or refused attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    FailFast,
    CircuitOpen,
    MaxAttemptsReached,
}

impl RetryDecision {
    /// Decide what follows failed attempt `attempt` of kind `kind`.
    ///
    /// The attempt budget is checked first, so a permanent failure on the
    /// last attempt still reports exhaustion.
    pub fn after_failure(attempt: u32, config: &RetryConfig, kind: FailureKind) -> Self {
        if attempt >= config.max_attempts {
            RetryDecision::MaxAttemptsReached
        } else if !config.is_retryable(kind) {
            RetryDecision::FailFast
        } else {
            RetryDecision::Retry
        }
    }

    /// The execution outcome this verdict ends with, `None` for a retry
    pub fn terminal(self) -> Option<ExecutionDecision> {
        match self {
            RetryDecision::Retry => None,
            RetryDecision::FailFast => Some(ExecutionDecision::FailFast),
            RetryDecision::CircuitOpen => Some(ExecutionDecision::CircuitOpen),
            RetryDecision::MaxAttemptsReached => Some(ExecutionDecision::RetryExhausted),
        }
    }
}

/// Why one attempt failed
#[derive(Debug, Error)]
pub enum AttemptError<E>
where
    E: Error + Send + Sync + 'static,
{
    /// The operation returned an error
    #[error(transparent)]
    Operation(E),

    /// The attempt outlived its deadline and was dropped
    #[error("attempt timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The attempt never produced a value (panicked or was torn down)
    #[error("attempt aborted: {message}")]
    Aborted { message: String },

    /// The execution was refused before the first attempt
    #[error("invalid execution settings: {message}")]
    InvalidConfiguration { message: String },
}

impl<E> AttemptError<E>
where
    E: Error + Send + Sync + 'static,
{
    /// Failure category used for breaker, retry and backoff decisions
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            AttemptError::Operation(error) => classify(error),
            AttemptError::Timeout { .. } => FailureKind::Timeout,
            AttemptError::Aborted { .. } => FailureKind::Unknown,
            AttemptError::InvalidConfiguration { .. } => FailureKind::ValidationError,
        }
    }

    pub fn operation_error(&self) -> Option<&E> {
        match self {
            AttemptError::Operation(error) => Some(error),
            _ => None,
        }
    }

    pub fn into_operation_error(self) -> Option<E> {
        match self {
            AttemptError::Operation(error) => Some(error),
            _ => None,
        }
    }
}

/// Error form of a non-successful [`RetryResult`]
#[derive(Debug, Error)]
pub enum ExecutionError<E>
where
    E: Error + Send + Sync + 'static,
{
    #[error("circuit breaker for `{service}` is open")]
    CircuitOpen { service: String },

    #[error("bulkhead for `{service}` is full")]
    Rejected { service: String },

    #[error("execution cancelled")]
    Cancelled,

    #[error("execution for `{service}` failed after {attempts} attempt(s) ({decision})")]
    Failed {
        service: String,
        decision: ExecutionDecision,
        attempts: u32,
        #[source]
        source: AttemptError<E>,
    },
}

impl<E> ExecutionError<E>
where
    E: Error + Send + Sync + 'static,
{
    pub fn decision(&self) -> ExecutionDecision {
        match self {
            ExecutionError::CircuitOpen { .. } => ExecutionDecision::CircuitOpen,
            ExecutionError::Rejected { .. } => ExecutionDecision::FailFast,
            ExecutionError::Cancelled => ExecutionDecision::Cancelled,
            ExecutionError::Failed { decision, .. } => *decision,
        }
    }
}

/// Everything the executor knows about one execution
#[derive(Debug)]
pub struct RetryResult<T, E>
where
    E: Error + Send + Sync + 'static,
{
    pub operation_id: String,
    pub service_name: String,
    pub success: bool,
    pub result: Option<T>,
    /// Last attempt error, if any attempt failed
    pub error: Option<AttemptError<E>>,
    pub total_attempts: u32,
    pub total_time_ms: u64,
    pub attempts: Vec<RetryAttempt>,
    pub decision: ExecutionDecision,
    pub circuit_breaker_triggered: bool,
    /// The bulkhead had no free slot for the next attempt
    pub bulkhead_rejected: bool,
}

impl<T, E> RetryResult<T, E>
where
    E: Error + Send + Sync + 'static,
{
    /// Collapse into a plain `Result`
    pub fn into_result(self) -> Result<T, ExecutionError<E>> {
        let RetryResult {
            service_name, result, error, total_attempts, decision, bulkhead_rejected, ..
        } = self;

        match (decision, result, error) {
            (ExecutionDecision::Success, Some(value), _) => Ok(value),
            (ExecutionDecision::CircuitOpen, _, _) => {
                Err(ExecutionError::CircuitOpen { service: service_name })
            }
            (ExecutionDecision::Cancelled, _, _) => Err(ExecutionError::Cancelled),
            _ if bulkhead_rejected => Err(ExecutionError::Rejected { service: service_name }),
            (decision, _, Some(source)) => Err(ExecutionError::Failed {
                service: service_name,
                decision,
                attempts: total_attempts,
                source,
            }),
            (_, _, None) => Err(ExecutionError::Rejected { service: service_name }),
        }
    }
}
