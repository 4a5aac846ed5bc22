//! Redis keepalive
//!
//! Periodically pings Redis so idle connections stay open and a broken
//! connection is noticed (and re-established by `ConnectionManager`) before a
//! request needs it.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

use crate::cache::CacheClient;

/// How often to ping Redis
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(60);

/// Failures in a row after which the log level escalates
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

#[derive(Clone)]
pub struct RedisHealthConfig {
    pub enabled: bool,
    pub check_interval: Duration,
    pub initial_delay: Duration,
}

impl Default for RedisHealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: HEALTH_CHECK_INTERVAL,
            initial_delay: Duration::from_secs(10),
        }
    }
}

/// Ping until shutdown; returns the number of pings attempted
pub async fn start_redis_health_check(
    cache: Arc<dyn CacheClient>,
    config: RedisHealthConfig,
    mut shutdown: watch::Receiver<bool>,
) -> u64 {
    if !config.enabled {
        tracing::info!("Redis health check disabled by configuration");
        return 0;
    }

    tracing::info!(
        interval_secs = config.check_interval.as_secs(),
        "Starting Redis health check background job"
    );

    let mut wait = config.initial_delay;
    let mut consecutive_failures: u32 = 0;
    let mut pings: u64 = 0;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = sleep(wait) => {}
        }
        if *shutdown.borrow() {
            break;
        }
        wait = config.check_interval;
        pings += 1;

        match cache.ping().await {
            Ok(()) => {
                if consecutive_failures > 0 {
                    tracing::info!(
                        previous_failures = consecutive_failures,
                        "Redis connection recovered"
                    );
                }
                consecutive_failures = 0;
                tracing::debug!("Redis health check: OK");
            }
            Err(e) => {
                consecutive_failures += 1;
                if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                    tracing::error!(
                        consecutive_failures,
                        error = %e,
                        "Redis health check: CRITICAL - multiple consecutive failures"
                    );
                } else {
                    tracing::warn!(
                        consecutive_failures,
                        error = %e,
                        "Redis health check: FAILED"
                    );
                }
            }
        }
    }

    tracing::info!("Redis health check stopped");
    pings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RedisHealthConfig::default();
        assert!(config.enabled);
        assert_eq!(config.check_interval, Duration::from_secs(60));
    }
}
