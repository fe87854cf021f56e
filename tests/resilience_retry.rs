//! Retry timing and classification of the resilience executor, on a paused clock.

use genai_core::resilience::{ErrorClass, ResilienceExecutor, RetryPolicy};
use genai_core::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn policy() -> RetryPolicy {
    RetryPolicy::new("recipe.generate")
        .with_deadline(Duration::from_secs(20))
        .with_max_retries(2)
        .with_base_delay(Duration::from_secs(1))
        .with_max_delay(Duration::from_secs(30))
        .without_jitter()
}

/// Paused-clock timers fire on millisecond ticks; allow a tick per sleep.
fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    assert!(
        elapsed >= expected && elapsed <= expected + Duration::from_millis(2),
        "expected ~{:?}, took {:?}",
        expected,
        elapsed
    );
}

#[tokio::test(start_paused = true)]
async fn test_one_transient_failure_costs_one_base_delay() {
    let executor = ResilienceExecutor::new();
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let c = Arc::clone(&calls);
    let out: String = executor
        .execute(&policy(), move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::from_http_status(503, "overloaded"))
                } else {
                    Ok("{\"name\":\"Daiquiri\"}".to_string())
                }
            }
        })
        .await
        .unwrap();

    assert_eq!(out, "{\"name\":\"Daiquiri\"}");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_elapsed(start, Duration::from_secs(1));

    let stats = executor.stats();
    assert_eq!(stats.attempts, 2);
    assert_eq!(stats.retries, 1);
    assert_eq!(stats.successes, 1);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_doubles_until_budget_is_spent() {
    let executor = ResilienceExecutor::new();
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let c = Arc::clone(&calls);
    let err = executor
        .execute(&policy(), move || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(Error::upstream(
                    ErrorClass::NetworkTransient,
                    format!("reset #{}", n),
                ))
            }
        })
        .await
        .unwrap_err();

    // 1 + max_retries attempts, sleeping 1s then 2s.
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_elapsed(start, Duration::from_secs(3));
    assert!(err.to_string().contains("reset #3"), "last error wins: {}", err);
}

#[tokio::test(start_paused = true)]
async fn test_slow_attempt_times_out_and_is_retried() {
    let executor = ResilienceExecutor::new();
    let calls = Arc::new(AtomicU32::new(0));
    let policy = policy().with_deadline(Duration::from_millis(500));

    let c = Arc::clone(&calls);
    let out = executor
        .execute(&policy, move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                }
                Ok(7u32)
            }
        })
        .await
        .unwrap();

    assert_eq!(out, 7);
    assert_eq!(executor.stats().timeouts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_and_parse_failures_are_not_retried() {
    let executor = ResilienceExecutor::new();
    for err in [
        Error::from_http_status(400, "bad request"),
        Error::from_http_status(401, "bad key"),
        Error::parse("not json"),
    ] {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let class = err.class();
        let mut slot = Some(err);
        let out = executor
            .execute(&policy(), move || {
                c.fetch_add(1, Ordering::SeqCst);
                let e = slot.take();
                async move {
                    match e {
                        Some(e) => Err::<(), _>(e),
                        None => Ok(()),
                    }
                }
            })
            .await;
        tokio_test::assert_err!(out);
        assert_eq!(calls.load(Ordering::SeqCst), 1, "{:?} must not retry", class);
    }
}

#[tokio::test(start_paused = true)]
async fn test_retry_after_hint_replaces_exponential_delay() {
    let executor = ResilienceExecutor::new();
    let calls = Arc::new(AtomicU32::new(0));
    let start = Instant::now();

    let c = Arc::clone(&calls);
    executor
        .execute(&policy(), move || {
            let c = Arc::clone(&c);
            async move {
                if c.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(Error::from_http_status(429, "slow down").with_retry_after_ms(4_000))
                } else {
                    Ok(())
                }
            }
        })
        .await
        .unwrap();

    assert_elapsed(start, Duration::from_secs(4));
}
