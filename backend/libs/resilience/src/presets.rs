/// Preset retry settings for the interaction service's external calls
use crate::retry::RetryConfig;
use std::time::Duration;

/// Cache invalidation on the synchronous write path
///
/// - 3 retries, 20ms -> 80ms
/// - Kept short: the caller is waiting and the record is already durable
pub fn cache_invalidation() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(200),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

/// Fire-and-forget event publishing from a detached task
///
/// - 5 retries, 100ms -> 2s
pub fn event_publish() -> RetryConfig {
    RetryConfig {
        max_retries: 5,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_secs(2),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

/// Counter reconciliation against the persistent store
///
/// `max_retries` is unused by the worker, which backs off forever instead of
/// dropping events; only the delay shape matters.
pub fn reconciliation() -> RetryConfig {
    RetryConfig {
        max_retries: u32::MAX,
        initial_backoff: Duration::from_millis(250),
        max_backoff: Duration::from_secs(30),
        backoff_multiplier: 2.0,
        jitter: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_are_bounded() {
        for config in [cache_invalidation(), event_publish(), reconciliation()] {
            assert!(config.initial_backoff <= config.max_backoff);
            assert!(config.backoff_multiplier >= 1.0);
        }
        assert!(cache_invalidation().max_backoff <= Duration::from_millis(200));
    }
}
