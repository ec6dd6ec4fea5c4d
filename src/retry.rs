//! Retry with exponential backoff for warehouse calls.

use crate::error::{PipelineError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling on any single delay
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    /// Bound on each individual attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: usize, initial_delay: Duration, attempt_timeout: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            attempt_timeout,
            ..Self::default()
        }
    }

    /// A single attempt, no retries.
    pub fn once(attempt_timeout: Duration) -> Self {
        Self::new(0, Duration::ZERO, attempt_timeout)
    }

    /// Calculate delay for retry attempt (exponential backoff)
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let delay_ms =
            (self.initial_delay.as_millis() as f64) * self.backoff_multiplier.powi(attempt as i32);
        let delay_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(delay_ms as u64)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    /// The last error is returned unchanged.
    pub async fn run<F, Fut, T>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(result) => result,
                Err(_) => Err(PipelineError::Warehouse(format!(
                    "{} timed out after {:?}",
                    what, self.attempt_timeout
                ))),
            };
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_retries && is_transient(&e) => {
                    let delay = self.delay_for_attempt(attempt);
                    attempt += 1;
                    warn!(
                        "{} failed (attempt {} of {}): {}; retrying in {:?}",
                        what,
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Errors worth another attempt: timeouts, dropped connections, busy databases.
pub fn is_transient(error: &PipelineError) -> bool {
    match error {
        PipelineError::Database(e) => matches!(
            e,
            sqlx::Error::Io(_)
                | sqlx::Error::PoolTimedOut
                | sqlx::Error::PoolClosed
                | sqlx::Error::WorkerCrashed
        ),
        PipelineError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
            e.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        PipelineError::Warehouse(msg) => is_transient_message(msg),
        PipelineError::Io(e) => is_transient_message(&e.to_string()),
        _ => false,
    }
}

fn is_transient_message(msg: &str) -> bool {
    let msg = msg.to_lowercase();
    ["timed out", "timeout", "connection", "network", "temporar", "busy", "locked"]
        .iter()
        .any(|p| msg.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast(max_retries: usize) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(1), Duration::from_millis(200))
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_delay: Duration::from_millis(300),
            ..RetryPolicy::new(5, Duration::from_millis(100), Duration::from_secs(1))
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_transient_errors_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = fast(3)
            .run("append", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PipelineError::Warehouse("connection reset".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<()> = fast(3)
            .run("append", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(PipelineError::Warehouse("column \"x\" does not exist".into()))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeouts_count_as_transient() {
        let calls = AtomicUsize::new(0);
        let policy = RetryPolicy::new(1, Duration::from_millis(1), Duration::from_millis(20));
        let result: Result<()> = policy
            .run("append", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(result.unwrap_err().to_string().contains("timed out"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
