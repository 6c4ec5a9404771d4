//! Retry logic: transient fault signatures and backoff
//!
//! Two flavors of retry live here:
//! - [`FaultSignature`] and [`random_backoff`] drive the per-session replay loop of
//!   [`RetryableSession`](crate::session::RetryableSession). Faults are recognized
//!   from the response itself (status and content), not from errors.
//! - [`with_retry`] wraps a fallible async operation with exponential backoff and
//!   optional jitter. The stream consume loop uses it to ride out broker hiccups.
//!
//! # Example
//!
//! ```no_run
//! use transistor::retry::{IsRetryable, with_retry};
//! use transistor::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Status a session reports when the local transport timed out
pub const TIMEOUT_SENTINEL_STATUS: u16 = 408;

/// A recognizable pattern marking a temporary upstream failure
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultSignature {
    /// The proxy or rendering service is overloaded or has blocked us (HTTP 503)
    Overloaded,
    /// The upstream site timed out behind the rendering service (HTTP 504)
    UpstreamTimeout,
    /// Our own transport gave up waiting (synthetic sentinel status)
    LocalTimeout,
}

impl FaultSignature {
    /// Classify a response by its status and body
    ///
    /// The rendering service may report an upstream fault with a status other
    /// than 503/504 and an `http503`/`http504` marker in the body, so both the
    /// status and the content are checked. Sessions only classify non-2xx
    /// responses; a success status is never replayed.
    pub fn classify(status: u16, content: &[u8]) -> Option<Self> {
        if status == 503 || contains(content, b"http503") {
            return Some(FaultSignature::Overloaded);
        }
        if status == 504 || contains(content, b"http504") {
            return Some(FaultSignature::UpstreamTimeout);
        }
        if status == TIMEOUT_SENTINEL_STATUS {
            return Some(FaultSignature::LocalTimeout);
        }
        None
    }

    /// Short label for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultSignature::Overloaded => "overloaded",
            FaultSignature::UpstreamTimeout => "upstream_timeout",
            FaultSignature::LocalTimeout => "local_timeout",
        }
    }
}

impl std::fmt::Display for FaultSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Pick a backoff uniformly in `min..=max`
///
/// Falls back to `min` when the window is empty or inverted.
pub fn random_backoff(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let mut rng = rand::thread_rng();
    let millis = rng.gen_range(min.as_millis()..=max.as_millis());
    Duration::from_millis(millis as u64)
}

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network timeouts, connection reset) should return `true`.
/// Permanent failures (bad configuration, undecodable data) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => e.is_timeout() || e.is_connect(),
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Timeout(_) => true,
            // Broker errors are classified by content
            Error::Broker(msg) => {
                let msg = msg.to_ascii_lowercase();
                msg.contains("timeout")
                    || msg.contains("timed out")
                    || msg.contains("connection")
                    || msg.contains("temporar")
                    || msg.contains("unavailable")
            }
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::NotRefreshable
            | Error::Scraper(_)
            | Error::Export(_)
            | Error::Decode(_)
            | Error::Stalled { .. }
            | Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// Returns the successful result or the last error after all retry attempts are
/// exhausted. Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut attempt = 0;
    let mut delay = config.initial_delay;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                attempt += 1;

                tracing::warn!(
                    error = %e,
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };

                tokio::time::sleep(jittered_delay).await;

                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay: the result lies between `delay` and `2 * delay`
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn status_503_is_overloaded() {
        assert_eq!(
            FaultSignature::classify(503, b""),
            Some(FaultSignature::Overloaded)
        );
    }

    #[test]
    fn http503_marker_in_content_is_overloaded() {
        let body = br#"{"error": "http503", "info": "slavebanned"}"#;
        assert_eq!(
            FaultSignature::classify(200, body),
            Some(FaultSignature::Overloaded)
        );
    }

    #[test]
    fn status_504_and_marker_are_upstream_timeouts() {
        assert_eq!(
            FaultSignature::classify(504, b""),
            Some(FaultSignature::UpstreamTimeout)
        );
        assert_eq!(
            FaultSignature::classify(502, b"render failed: http504"),
            Some(FaultSignature::UpstreamTimeout)
        );
    }

    #[test]
    fn sentinel_status_is_local_timeout() {
        assert_eq!(
            FaultSignature::classify(TIMEOUT_SENTINEL_STATUS, b""),
            Some(FaultSignature::LocalTimeout)
        );
    }

    #[test]
    fn permanent_statuses_are_not_faults() {
        assert_eq!(FaultSignature::classify(200, b"<html>ok</html>"), None);
        assert_eq!(FaultSignature::classify(404, b"not found"), None);
        assert_eq!(FaultSignature::classify(500, b"boom"), None);
    }

    #[test]
    fn random_backoff_stays_in_window() {
        let min = Duration::from_millis(12);
        let max = Duration::from_millis(20);
        for i in 0..200 {
            let delay = random_backoff(min, max);
            assert!(
                delay >= min && delay <= max,
                "iteration {i}: {delay:?} outside {min:?}..={max:?}"
            );
        }
    }

    #[test]
    fn random_backoff_with_empty_window_returns_min() {
        let d = Duration::from_millis(7);
        assert_eq!(random_backoff(d, d), d);
        assert_eq!(random_backoff(d, Duration::from_millis(1)), d);
    }

    #[tokio::test]
    async fn retry_transient_then_succeed() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(3), || {
            let counter = counter_clone.clone();
            async move {
                let count = counter.fetch_add(1, Ordering::SeqCst);
                if count < 2 {
                    Err(TestError::Transient)
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_exhausted_returns_last_error() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(2), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(matches!(result, Err(TestError::Transient)));
        assert_eq!(counter.load(Ordering::SeqCst), 3, "initial + 2 retries");
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = with_retry(&fast_config(5), || {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn add_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(50);
        for i in 0..200 {
            let jittered = add_jitter(delay);
            assert!(
                jittered >= delay && jittered <= delay * 2,
                "iteration {i}: jittered {jittered:?} out of range"
            );
        }
    }

    #[test]
    fn broker_errors_are_classified_by_content() {
        assert!(Error::Broker("connection reset by peer".into()).is_retryable());
        assert!(Error::Broker("request Timed Out".into()).is_retryable());
        assert!(Error::Broker("service temporarily unavailable".into()).is_retryable());
        assert!(!Error::Broker("consumer deleted".into()).is_retryable());
    }

    #[test]
    fn permanent_errors_are_not_retryable() {
        assert!(!Error::config("bad", "pool_size").is_retryable());
        assert!(!Error::Decode("bad keywords".into()).is_retryable());
        assert!(!Error::NotRefreshable.is_retryable());
        assert!(!Error::Stalled { pending: 1 }.is_retryable());
    }

    #[test]
    fn io_timeouts_are_retryable() {
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::TimedOut, "t"));
        assert!(err.is_retryable());
        let err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "n"));
        assert!(!err.is_retryable());
    }
}
