/// Retry and timeout helpers shared by the interaction service.
///
/// - **Backoff**: capped exponential delays with optional ±30% jitter
/// - **Retry**: bounded re-execution of a fallible async operation, keeping the last error
/// - **Timeout**: deadline enforcement that keeps the inner error type intact
/// - **Presets**: tuned retry settings for cache invalidation, event publishing and
///   counter reconciliation
///
/// # Example: bounded retry around a cache call
///
/// ```rust,no_run
/// use resilience::{presets, with_retry};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry(&presets::cache_invalidation(), || async {
///         // DEL on the cache
///         Ok::<_, String>(())
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```
///
/// # Example: cache lookup with a deadline
///
/// ```rust,no_run
/// use resilience::with_timeout;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_timeout(Duration::from_millis(200), async {
///         Ok::<_, String>(true)
///     })
///     .await;
///     assert!(result.is_ok());
/// }
/// ```

pub mod presets;
pub mod retry;
pub mod timeout;

pub use retry::{with_retry, Backoff, RetryConfig, RetryError};
pub use timeout::{with_timeout, TimeoutError};
