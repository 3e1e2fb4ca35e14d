//! Operations the executor can run
//!
//! An [`Operation`] is invoked once per attempt. Async closures are wrapped
//! in [`AsyncOperation`]; synchronous code goes through [`BlockingOperation`],
//! which runs each attempt on tokio's blocking pool so the attempt deadline
//! still applies to the caller.

use std::error::Error;
use std::future::Future;
use std::sync::Arc;

use super::attempt::AttemptError;

/// A unit of work that can be attempted repeatedly
pub trait Operation: Send + Sync {
    type Output: Send;
    type Error: Error + Send + Sync + 'static;

    /// Run one attempt
    fn run(&self) -> impl Future<Output = Result<Self::Output, AttemptError<Self::Error>>> + Send;
}

/// Adapter for closures returning a future
pub struct AsyncOperation<F> {
    factory: F,
}

impl<F> AsyncOperation<F> {
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, Fut, T, E> Operation for AsyncOperation<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send,
    T: Send,
    E: Error + Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    fn run(&self) -> impl Future<Output = Result<T, AttemptError<E>>> + Send {
        let attempt = (self.factory)();
        async move { attempt.await.map_err(AttemptError::Operation) }
    }
}

/// Adapter for synchronous closures
///
/// When an attempt times out the closure keeps running on the blocking pool
/// until it returns; only its result is discarded.
pub struct BlockingOperation<F> {
    function: Arc<F>,
}

impl<F> BlockingOperation<F> {
    pub fn new(function: F) -> Self {
        Self { function: Arc::new(function) }
    }
}

impl<F, T, E> Operation for BlockingOperation<F>
where
    F: Fn() -> Result<T, E> + Send + Sync + 'static,
    T: Send + 'static,
    E: Error + Send + Sync + 'static,
{
    type Output = T;
    type Error = E;

    fn run(&self) -> impl Future<Output = Result<T, AttemptError<E>>> + Send {
        let function = Arc::clone(&self.function);
        async move {
            match tokio::task::spawn_blocking(move || function()).await {
                Ok(outcome) => outcome.map_err(AttemptError::Operation),
                Err(join_error) => Err(AttemptError::Aborted { message: join_error.to_string() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    /// Validates each run invokes the closure again.
    ///
    /// Assertions:
    /// - Confirms values and errors pass through unchanged.
    #[tokio::test]
    async fn test_async_operation_runs_per_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let operation = AsyncOperation::new(move || {
            let counter = Arc::clone(&counter);
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                if call == 1 {
                    Err(io::Error::other("first call fails"))
                } else {
                    Ok(call)
                }
            }
        });

        assert!(matches!(operation.run().await, Err(AttemptError::Operation(_))));
        assert_eq!(operation.run().await.ok(), Some(2));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    /// Validates the blocking adapter off the async runtime.
    ///
    /// Assertions:
    /// - Confirms results come back from the blocking pool.
    /// - Confirms a panic surfaces as `Aborted`.
    #[tokio::test]
    async fn test_blocking_operation() {
        let operation = BlockingOperation::new(|| Ok::<_, io::Error>(21 * 2));
        assert_eq!(operation.run().await.ok(), Some(42));

        let panicking = BlockingOperation::new(|| -> Result<(), io::Error> {
            panic!("worker exploded");
        });
        assert!(matches!(panicking.run().await, Err(AttemptError::Aborted { .. })));
    }
}
