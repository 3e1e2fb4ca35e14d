//! Resilience hot-path benchmarks
//!
//! Covers the per-attempt work the retry executor does outside the wrapped
//! operation: breaker admission and bookkeeping, failure classification and
//! delay calculation.
//!
//! Run with: `cargo bench --bench resilience_bench -p steadycall-common
//! --features runtime`

use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use steadycall_common::failure::{classify_text, FailureKind};
use steadycall_common::resilience::{
    calculate_delay, AdaptiveDelayCalculator, CircuitBreaker, CircuitBreakerConfig, MockClock,
    RetryConfig, RetryStrategy,
};

// ============================================================================
// Circuit Breaker Benchmarks
// ============================================================================

fn bench_circuit_breaker(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_breaker");

    group.bench_function("closed_admit_and_record", |b| {
        let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default())
            .expect("default breaker config is valid");
        b.iter(|| {
            black_box(breaker.can_execute());
            breaker.record_success();
        });
    });

    group.bench_function("open_short_circuit", |b| {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(1)
            .timeout(Duration::from_secs(3_600))
            .build()
            .expect("valid breaker config");
        let breaker = CircuitBreaker::new("bench", config).expect("breaker should build");
        breaker.record_failure();

        b.iter(|| black_box(breaker.can_execute()));
    });

    group.bench_function("open_half_open_recover", |b| {
        let config = CircuitBreakerConfig::builder()
            .failure_threshold(3)
            .success_threshold(2)
            .half_open_max_calls(2)
            .timeout(Duration::from_millis(10))
            .build()
            .expect("valid breaker config");

        b.iter(|| {
            let clock = MockClock::new();
            let breaker = CircuitBreaker::with_clock("bench", config.clone(), clock.clone())
                .expect("breaker should build");
            for _ in 0..3 {
                breaker.record_failure();
            }
            clock.advance(Duration::from_millis(10));
            for _ in 0..2 {
                black_box(breaker.can_execute());
                breaker.record_success();
            }
            black_box(breaker.state());
        });
    });

    group.finish();
}

// ============================================================================
// Classification Benchmarks
// ============================================================================

fn bench_classification(c: &mut Criterion) {
    let mut group = c.benchmark_group("classification");
    let messages = [
        ("timeout", "operation timed out after 30s"),
        ("server", "upstream responded with HTTP 503 Service Unavailable"),
        ("validation", "422 invalid input: field `email`"),
        ("unknown", "the widget could not be frobnicated"),
    ];

    for (label, message) in messages {
        group.bench_with_input(BenchmarkId::from_parameter(label), message, |b, message| {
            b.iter(|| black_box(classify_text("UpstreamError", black_box(message))));
        });
    }

    group.finish();
}

// ============================================================================
// Delay Benchmarks
// ============================================================================

fn bench_delay_calculation(c: &mut Criterion) {
    let mut group = c.benchmark_group("delay_calculation");
    let adaptive = AdaptiveDelayCalculator::default();
    for i in 0..100 {
        adaptive.update("bench", i % 3 != 0, 250 + i);
    }

    for strategy in [
        RetryStrategy::Exponential,
        RetryStrategy::Fibonacci,
        RetryStrategy::Adaptive,
    ] {
        let config = RetryConfig::builder()
            .strategy(strategy)
            .base_delay_ms(100)
            .max_delay_ms(30_000)
            .jitter_factor(0.2)
            .build()
            .expect("valid retry config");

        group.bench_with_input(BenchmarkId::from_parameter(strategy), &config, |b, config| {
            b.iter(|| {
                for attempt in 1..=8 {
                    black_box(calculate_delay(
                        config,
                        attempt,
                        FailureKind::ServerError,
                        &adaptive,
                        "bench",
                    ));
                }
            });
        });
    }

    group.finish();
}

criterion_group!(resilience, bench_circuit_breaker, bench_classification, bench_delay_calculation);
criterion_main!(resilience);
