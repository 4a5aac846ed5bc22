/// Integration tests for resilience library
use resilience::{presets, with_retry, with_timeout, Backoff, RetryConfig, TimeoutError};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ==================== Retry + Timeout Composition ====================

#[tokio::test(start_paused = true)]
async fn test_retry_over_timeouts_recovers() {
    let config = RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(5),
        jitter: false,
        ..Default::default()
    };
    let calls = Arc::new(AtomicU32::new(0));

    let result = with_retry(&config, || {
        let calls = calls.clone();
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            with_timeout(Duration::from_millis(50), async move {
                if n == 0 {
                    // first call hangs past the deadline
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                Ok::<_, String>(n)
            })
            .await
        }
    })
    .await;

    assert_eq!(result.unwrap(), 1);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhaustion_reports_timeout() {
    let config = RetryConfig {
        max_retries: 1,
        initial_backoff: Duration::from_millis(5),
        jitter: false,
        ..Default::default()
    };

    let result = with_retry(&config, || {
        with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok::<(), String>(())
        })
    })
    .await;

    let err = result.unwrap_err();
    assert_eq!(err.attempts(), 2);
    assert!(matches!(err.into_last(), TimeoutError::Elapsed(_)));
}

// ==================== Presets ====================

#[test]
fn test_reconciliation_backoff_reaches_cap() {
    let config = RetryConfig {
        jitter: false,
        ..presets::reconciliation()
    };
    let mut backoff = Backoff::new(&config);

    let mut last = Duration::ZERO;
    for _ in 0..20 {
        last = backoff.next_delay();
    }
    assert_eq!(last, config.max_backoff);
}
