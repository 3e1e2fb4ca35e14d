//! Retry execution
//!
//! [`RetryExecutor`] drives an [`Operation`] through the per-service circuit
//! breaker and bulkhead kept in a [`ServiceRegistry`], retrying classified
//! failures with backoff and reporting every attempt in a [`RetryResult`].

pub mod attempt;
pub mod executor;
pub mod operation;
pub mod registry;

pub use attempt::{
    AttemptError, ExecutionDecision, ExecutionError, RetryAttempt, RetryDecision, RetryResult,
};
pub use executor::{ExecuteOptions, RetryExecutor};
pub use operation::{AsyncOperation, BlockingOperation, Operation};
pub use registry::ServiceRegistry;
