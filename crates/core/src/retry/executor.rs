//! The retry loop
//!
//! Each attempt passes through the same gates in order: the service's
//! circuit breaker, its bulkhead, then the operation under the attempt
//! deadline. Failures are classified once and the kind drives the breaker,
//! the retry verdict and the backoff.
//!
//! Attempt records are queued to a background task that owns the sink, so a
//! slow store never adds latency between attempts.

use std::error::Error;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use steadycall_common::resilience::{
    calculate_delay, CallGrant, CircuitBreaker, CircuitBreakerConfig, Clock, RetryConfig,
    SystemClock,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn, Span};

use super::attempt::{
    AttemptError, ExecutionDecision, ExecutionError, RetryAttempt, RetryDecision, RetryResult,
};
use super::operation::{AsyncOperation, BlockingOperation, Operation};
use super::registry::ServiceRegistry;
use crate::config::EngineConfig;
use crate::errors::Result;
use crate::metrics::{ResilienceMonitor, ServiceMetrics, SystemStatus};
use crate::ports::{AttemptRecord, AttemptSink, AttemptStore, LoggingAttemptSink};

/// Per-call settings; unset fields fall back to the engine configuration
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub operation_id: Option<String>,
    pub retry: Option<RetryConfig>,
    pub circuit_breaker: Option<CircuitBreakerConfig>,
    pub cancellation: Option<CancellationToken>,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn operation_id(mut self, operation_id: impl Into<String>) -> Self {
        self.operation_id = Some(operation_id.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

/// Runs operations against named services with retries, breakers and
/// bulkheads
pub struct RetryExecutor<C: Clock + Clone = SystemClock> {
    config: EngineConfig,
    registry: Arc<ServiceRegistry<C>>,
    sink: Arc<dyn AttemptSink>,
    /// Queue to the sink worker, started by the first recorded attempt
    sink_queue: OnceLock<mpsc::Sender<SinkMessage>>,
    monitor: ResilienceMonitor<C>,
}

enum SinkMessage {
    Record(AttemptRecord),
    /// Acknowledged once every record queued before it was handled
    Flush(oneshot::Sender<()>),
}

impl RetryExecutor<SystemClock> {
    /// Create an executor with its own registry
    pub fn new(config: EngineConfig) -> Result<Self> {
        let registry = Arc::new(ServiceRegistry::new(config.adaptive.clone())?);
        Self::with_registry(config, registry)
    }
}

impl<C: Clock + Clone> RetryExecutor<C> {
    /// Create an executor over a shared registry
    pub fn with_registry(config: EngineConfig, registry: Arc<ServiceRegistry<C>>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            monitor: ResilienceMonitor::new(Arc::clone(&registry)),
            registry,
            sink: Arc::new(LoggingAttemptSink),
            sink_queue: OnceLock::new(),
        })
    }

    /// Send attempts to `sink` instead of the log
    pub fn with_sink(mut self, sink: Arc<dyn AttemptSink>) -> Self {
        self.sink = sink;
        self.sink_queue = OnceLock::new();
        self
    }

    /// Persist attempts to `store` and read metrics back from it
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: AttemptStore + 'static,
    {
        self.sink = store.clone();
        self.sink_queue = OnceLock::new();
        self.monitor = self.monitor.with_store(store);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry<C>> {
        &self.registry
    }

    /// Run `operation` against `service_name` until it succeeds, fails
    /// permanently, exhausts its attempts, hits an open breaker or is
    /// cancelled.
    ///
    /// Never returns an error: every outcome is described by the returned
    /// [`RetryResult`].
    #[instrument(skip_all, fields(service = %service_name, operation_id = tracing::field::Empty))]
    pub async fn execute<O>(
        &self,
        service_name: &str,
        operation: &O,
        options: ExecuteOptions,
    ) -> RetryResult<O::Output, O::Error>
    where
        O: Operation,
    {
        let clock = self.registry.clock();
        let operation_id = options
            .operation_id
            .unwrap_or_else(|| format!("{service_name}_{}", clock.millis_since_epoch()));
        Span::current().record("operation_id", operation_id.as_str());

        let retry = options.retry.unwrap_or_else(|| self.config.retry_for(service_name).clone());
        let breaker_config = options
            .circuit_breaker
            .unwrap_or_else(|| self.config.circuit_breaker_for(service_name).clone());
        let cancel = options.cancellation.unwrap_or_else(CancellationToken::new);

        let mut run = Run::new(service_name, operation_id, clock.now(), retry.max_attempts);

        if let Err(error) = retry.validate() {
            warn!(error = %error, "Refusing execution with invalid retry settings");
            return run.refuse(error.to_string(), clock.now());
        }

        let breaker = if retry.circuit_breaker_enabled {
            match self.registry.circuit_breaker(service_name, &breaker_config) {
                Ok(breaker) => Some(breaker),
                Err(error) => {
                    warn!(error = %error, "Refusing execution with invalid breaker settings");
                    return run.refuse(error.to_string(), clock.now());
                }
            }
        } else {
            None
        };

        let bulkhead = if retry.bulkhead_enabled {
            let slots = self.config.bulkhead_size_for(service_name, retry.max_attempts);
            match self.registry.bulkhead(service_name, slots, self.config.bulkhead.acquire_timeout())
            {
                Ok(bulkhead) => Some(bulkhead),
                Err(error) => {
                    warn!(error = %error, "Refusing execution with invalid bulkhead settings");
                    return run.refuse(error.to_string(), clock.now());
                }
            }
        } else {
            None
        };

        for attempt_number in 1..=retry.max_attempts {
            let grant = match &breaker {
                Some(breaker) => match breaker.admit() {
                    Some(grant) => Some(grant),
                    None => {
                        warn!(attempt = attempt_number, "Circuit breaker open, not attempting");
                        run.circuit_breaker_triggered = true;
                        return run.finish(ExecutionDecision::CircuitOpen, None, clock.now());
                    }
                },
                None => None,
            };

            let permit = match &bulkhead {
                Some(bulkhead) => {
                    let acquired = tokio::select! {
                        biased;
                        () = cancel.cancelled() => None,
                        permit = bulkhead.acquire() => Some(permit),
                    };
                    match acquired {
                        None => {
                            release(&breaker, grant);
                            info!(attempt = attempt_number, "Execution cancelled");
                            return run.finish(ExecutionDecision::Cancelled, None, clock.now());
                        }
                        Some(None) => {
                            release(&breaker, grant);
                            warn!(attempt = attempt_number, "Bulkhead full, failing fast");
                            run.bulkhead_rejected = true;
                            return run.finish(ExecutionDecision::FailFast, None, clock.now());
                        }
                        Some(Some(permit)) => Some(permit),
                    }
                }
                None => None,
            };

            let started = clock.now();
            let timestamp_ms = i64::try_from(clock.millis_since_epoch()).unwrap_or(i64::MAX);

            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => None,
                outcome = tokio::time::timeout(retry.timeout(), operation.run()) => Some(outcome),
            };
            drop(permit);

            let outcome = match outcome {
                Some(Ok(outcome)) => outcome,
                Some(Err(_elapsed)) => Err(AttemptError::Timeout { timeout: retry.timeout() }),
                None => {
                    release(&breaker, grant);
                    info!(attempt = attempt_number, "Execution cancelled mid-attempt");
                    return run.finish(ExecutionDecision::Cancelled, None, clock.now());
                }
            };
            let response_time_ms = millis(clock.now().saturating_duration_since(started));

            match outcome {
                Ok(value) => {
                    if let (Some(breaker), Some(grant)) = (&breaker, grant) {
                        breaker.record_success_for(grant);
                    }
                    self.registry.health().update(service_name, true, response_time_ms);
                    if retry.adaptive_enabled {
                        self.registry.adaptive().update(service_name, true, response_time_ms);
                    }

                    let attempt = RetryAttempt {
                        attempt_number,
                        delay_ms: 0,
                        timestamp_ms,
                        error: None,
                        failure_kind: None,
                        response_time_ms,
                    };
                    self.persist(&run, attempt.clone(), true);
                    run.attempts.push(attempt);

                    debug!(attempt = attempt_number, response_time_ms, "Attempt succeeded");
                    return run.finish(ExecutionDecision::Success, Some(value), clock.now());
                }
                Err(error) => {
                    let kind = error.failure_kind();
                    if let (Some(breaker), Some(grant)) = (&breaker, grant) {
                        breaker.record_failure_for(grant);
                    }
                    self.registry.health().update(service_name, false, response_time_ms);
                    if retry.adaptive_enabled {
                        self.registry.adaptive().update(service_name, false, response_time_ms);
                    }

                    let decision = RetryDecision::after_failure(attempt_number, &retry, kind);
                    let delay = match decision {
                        RetryDecision::Retry => calculate_delay(
                            &retry,
                            attempt_number,
                            kind,
                            self.registry.adaptive(),
                            service_name,
                        ),
                        _ => Duration::ZERO,
                    };

                    let attempt = RetryAttempt {
                        attempt_number,
                        delay_ms: millis(delay),
                        timestamp_ms,
                        error: Some(error.to_string()),
                        failure_kind: Some(kind),
                        response_time_ms,
                    };
                    self.persist(&run, attempt.clone(), false);
                    run.attempts.push(attempt);

                    if let Some(terminal) = decision.terminal() {
                        warn!(
                            attempt = attempt_number,
                            failure_kind = %kind,
                            error = %error,
                            decision = %terminal,
                            "Attempt failed, giving up"
                        );
                        run.last_error = Some(error);
                        return run.finish(terminal, None, clock.now());
                    }

                    warn!(
                        attempt = attempt_number,
                        failure_kind = %kind,
                        delay_ms = millis(delay),
                        error = %error,
                        "Attempt failed, retrying"
                    );
                    run.last_error = Some(error);

                    let slept = tokio::select! {
                        biased;
                        () = cancel.cancelled() => false,
                        () = tokio::time::sleep(delay) => true,
                    };
                    if !slept {
                        info!(attempt = attempt_number, "Execution cancelled during backoff");
                        return run.finish(ExecutionDecision::Cancelled, None, clock.now());
                    }
                }
            }
        }

        run.finish(ExecutionDecision::RetryExhausted, None, clock.now())
    }

    /// [`execute`](Self::execute) an async closure with default options
    pub async fn execute_async<F, Fut, T, E>(&self, service_name: &str, factory: F) -> RetryResult<T, E>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: Send,
        E: Error + Send + Sync + 'static,
    {
        self.execute(service_name, &AsyncOperation::new(factory), ExecuteOptions::default()).await
    }

    /// [`execute`](Self::execute) a synchronous closure on the blocking pool
    pub async fn execute_blocking<F, T, E>(&self, service_name: &str, function: F) -> RetryResult<T, E>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        self.execute(service_name, &BlockingOperation::new(function), ExecuteOptions::default())
            .await
    }

    /// Like [`execute_async`](Self::execute_async) but collapsed into a `Result`
    pub async fn call_async<F, Fut, T, E>(
        &self,
        service_name: &str,
        factory: F,
    ) -> std::result::Result<T, ExecutionError<E>>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = std::result::Result<T, E>> + Send,
        T: Send,
        E: Error + Send + Sync + 'static,
    {
        self.execute_async(service_name, factory).await.into_result()
    }

    /// Like [`execute_blocking`](Self::execute_blocking) but collapsed into a
    /// `Result`
    pub async fn call_blocking<F, T, E>(
        &self,
        service_name: &str,
        function: F,
    ) -> std::result::Result<T, ExecutionError<E>>
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        T: Send + 'static,
        E: Error + Send + Sync + 'static,
    {
        self.execute_blocking(service_name, function).await.into_result()
    }

    pub async fn get_service_metrics(
        &self,
        service_name: &str,
        window_hours: u64,
    ) -> Result<ServiceMetrics> {
        self.flush().await;
        self.monitor.service_metrics(service_name, window_hours).await
    }

    pub fn get_system_status(&self) -> SystemStatus {
        self.monitor.system_status()
    }

    /// Force the breaker for `service_name` closed; `false` if it has none
    pub fn reset_circuit_breaker(&self, service_name: &str) -> bool {
        self.monitor.reset_circuit_breaker(service_name)
    }

    /// Wait until every attempt recorded so far has reached the sink
    pub async fn flush(&self) {
        let Some(queue) = self.sink_queue.get() else {
            return;
        };
        let (done, handled) = oneshot::channel();
        if queue.send(SinkMessage::Flush(done)).await.is_ok() {
            let _ = handled.await;
        }
    }

    fn persist<T, E>(&self, run: &Run<T, E>, attempt: RetryAttempt, success: bool)
    where
        E: Error + Send + Sync + 'static,
    {
        let record = AttemptRecord {
            service_name: run.service_name.clone(),
            operation_id: run.operation_id.clone(),
            attempt,
            success,
        };

        let queue = self.sink_queue.get_or_init(|| self.start_sink_worker());
        match queue.try_send(SinkMessage::Record(record)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!(
                capacity = self.config.sink_buffer_size,
                "Attempt sink queue full, dropping record"
            ),
            Err(TrySendError::Closed(_)) => warn!("Attempt sink stopped, dropping record"),
        }
    }

    fn start_sink_worker(&self) -> mpsc::Sender<SinkMessage> {
        let (queue, pending) = mpsc::channel(self.config.sink_buffer_size);
        tokio::spawn(drain_sink(Arc::clone(&self.sink), self.config.sink_timeout(), pending));
        debug!(capacity = self.config.sink_buffer_size, "Started attempt sink worker");
        queue
    }
}

/// Hand queued records to `sink` until every sender is gone
async fn drain_sink(
    sink: Arc<dyn AttemptSink>,
    timeout: Duration,
    mut pending: mpsc::Receiver<SinkMessage>,
) {
    while let Some(message) = pending.recv().await {
        match message {
            SinkMessage::Record(record) => {
                match tokio::time::timeout(timeout, sink.record_attempt(record)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => warn!(error = %error, "Failed to record attempt"),
                    Err(_) => {
                        warn!(timeout_ms = millis(timeout), "Timed out recording attempt");
                    }
                }
            }
            SinkMessage::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Attempt sink worker stopped");
}

/// Hand back a breaker grant for an attempt that never ran
fn release<C: Clock>(breaker: &Option<Arc<CircuitBreaker<C>>>, grant: Option<CallGrant>) {
    if let (Some(breaker), Some(grant)) = (breaker, grant) {
        breaker.release(grant);
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Bookkeeping for one execution
struct Run<T, E>
where
    E: Error + Send + Sync + 'static,
{
    service_name: String,
    operation_id: String,
    started: Instant,
    attempts: Vec<RetryAttempt>,
    last_error: Option<AttemptError<E>>,
    circuit_breaker_triggered: bool,
    bulkhead_rejected: bool,
    _output: std::marker::PhantomData<fn() -> T>,
}

impl<T, E> Run<T, E>
where
    E: Error + Send + Sync + 'static,
{
    fn new(service_name: &str, operation_id: String, started: Instant, max_attempts: u32) -> Self {
        Self {
            service_name: service_name.to_string(),
            operation_id,
            started,
            attempts: Vec::with_capacity(max_attempts.min(16) as usize),
            last_error: None,
            circuit_breaker_triggered: false,
            bulkhead_rejected: false,
            _output: std::marker::PhantomData,
        }
    }

    fn refuse(mut self, message: String, now: Instant) -> RetryResult<T, E> {
        self.last_error = Some(AttemptError::InvalidConfiguration { message });
        self.finish(ExecutionDecision::FailFast, None, now)
    }

    fn finish(self, decision: ExecutionDecision, result: Option<T>, now: Instant) -> RetryResult<T, E> {
        RetryResult {
            success: decision == ExecutionDecision::Success,
            total_attempts: u32::try_from(self.attempts.len()).unwrap_or(u32::MAX),
            total_time_ms: millis(now.saturating_duration_since(self.started)),
            operation_id: self.operation_id,
            service_name: self.service_name,
            result,
            error: self.last_error,
            attempts: self.attempts,
            decision,
            circuit_breaker_triggered: self.circuit_breaker_triggered,
            bulkhead_rejected: self.bulkhead_rejected,
        }
    }
}
