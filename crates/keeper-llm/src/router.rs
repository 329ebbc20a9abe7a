//! Retry/backoff executor shared by every concrete client. Adapted from the
//! teacher's `ProviderRouter`: that type failed over across *providers* on
//! exhaustion; this one retries a *single* call against one provider with
//! the decorrelated-jitter schedule and retryable-error taxonomy.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use keeper_core::CompanionError;

use crate::provider::{CallOptions, RetryEvent};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 6;
const MAX_BACKOFF_SECS: f64 = 45.0;

/// One attempt's outcome when it isn't a plain success.
#[derive(Debug, Clone)]
pub struct AttemptError {
    pub retryable: bool,
    pub message: String,
}

impl AttemptError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self { retryable: true, message: message.into() }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self { retryable: false, message: message.into() }
    }
}

/// HTTP status classification: 429 and 5xx are retryable, everything else
/// is a fatal client/auth/validation error.
pub fn classify_status(status: u16) -> bool {
    status == 429 || (500..=599).contains(&status)
}

/// Text classification for errors that don't carry an HTTP status (timeouts,
/// connection resets, or an API's own "overloaded"/"rate limit" wording).
pub fn classify_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    ["rate limit", "overloaded", "timeout", "timed out", "connection reset"]
        .iter()
        .any(|needle| lower.contains(needle))
}

/// `min(45s, 2^(attempt-1) + U[0,1))` decorrelated jitter, `attempt` 1-based.
pub fn backoff_delay(attempt: u32) -> Duration {
    let mut rng = rand::thread_rng();
    let base = 2f64.powi(attempt as i32 - 1);
    let jitter: f64 = rng.gen_range(0.0..1.0);
    Duration::from_secs_f64((base + jitter).min(MAX_BACKOFF_SECS))
}

/// Runs `attempt` up to `max_attempts` times, sleeping on the decorrelated
/// jitter schedule between retryable failures and firing `on_retry` on each.
/// Returns `CompanionError::LlmCallFailed` once attempts are exhausted or a
/// fatal error is hit, and `CompanionError::Aborted` if cancelled mid-wait.
pub async fn execute_with_retry<F, Fut, T>(
    options: &CallOptions,
    max_attempts: u32,
    mut attempt: F,
) -> Result<T, CompanionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, AttemptError>>,
{
    let mut last_message = String::new();
    for attempt_no in 1..=max_attempts {
        if options.cancel.is_cancelled() {
            return Err(CompanionError::Aborted);
        }

        match attempt(attempt_no).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_message = err.message.clone();
                warn!(attempt = attempt_no, retryable = err.retryable, err = %err.message, "llm call attempt failed");

                if !err.retryable || attempt_no == max_attempts {
                    return Err(CompanionError::LlmCallFailed {
                        attempts: attempt_no,
                        message: err.message,
                    });
                }

                let delay = backoff_delay(attempt_no);
                if let Some(on_retry) = &options.on_retry {
                    on_retry(RetryEvent {
                        attempt: attempt_no,
                        max_attempts,
                        delay_ms: delay.as_millis() as u64,
                        reason: err.message,
                    });
                }

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = options.cancel.cancelled() => {
                        return Err(CompanionError::Aborted);
                    }
                }
            }
        }
    }

    Err(CompanionError::LlmCallFailed { attempts: max_attempts, message: last_message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn options() -> (CancelSource, CallOptions) {
        let (source, cancel) = CancelSource::new();
        (
            source,
            CallOptions { cancel, request_tag: "t".to_string(), on_retry: None },
        )
    }

    #[test]
    fn classifies_429_and_5xx_as_retryable() {
        assert!(classify_status(429));
        assert!(classify_status(500));
        assert!(classify_status(503));
        assert!(!classify_status(400));
        assert!(!classify_status(401));
    }

    #[test]
    fn classifies_timeout_and_reset_text() {
        assert!(classify_message("request timed out"));
        assert!(classify_message("connection reset by peer"));
        assert!(classify_message("server overloaded, try again"));
        assert!(!classify_message("invalid api key"));
    }

    #[test]
    fn backoff_never_exceeds_cap() {
        for attempt in 1..20 {
            assert!(backoff_delay(attempt).as_secs_f64() <= 45.0);
        }
    }

    #[tokio::test]
    async fn succeeds_immediately_without_retry() {
        let (_source, opts) = options();
        let result = execute_with_retry(&opts, 3, |_| async { Ok::<_, AttemptError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let (_source, opts) = options();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result = execute_with_retry(&opts, 5, move |_| {
            let calls = calls_clone.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(AttemptError::retryable("rate limit"))
                } else {
                    Ok(99)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 99);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn fatal_error_does_not_retry() {
        let (_source, opts) = options();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let result: Result<i32, _> = execute_with_retry(&opts, 5, move |_| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AttemptError::fatal("invalid api key"))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausting_attempts_reports_attempt_count() {
        let (_source, opts) = options();
        let result: Result<i32, _> =
            execute_with_retry(&opts, 2, |_| async { Err(AttemptError::retryable("503")) }).await;
        match result.unwrap_err() {
            CompanionError::LlmCallFailed { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
