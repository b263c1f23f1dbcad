//! Resilience helpers for ModelForge services.
//!
//! Provides the exponential backoff policy used by job execution, a timeout
//! wrapper, and a cancellation-aware sleep.

use crate::error::{Result, ServeError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// Retry with Exponential Backoff
// ============================================================================

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay before first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Add jitter to delays.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Quick retry configuration.
    pub fn quick() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
            jitter: true,
        }
    }

    /// Calculate delay for a given attempt (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let delay = Duration::from_secs_f64(base_delay.min(self.max_delay.as_secs_f64()));

        if self.jitter {
            // Add up to 25% jitter
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..0.25);
            Duration::from_secs_f64(delay.as_secs_f64() * jitter_factor)
        } else {
            delay
        }
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn has_attempts_left(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

// ============================================================================
// Timeout Wrapper
// ============================================================================

/// Execute an operation with a timeout.
pub async fn with_timeout<F, Fut, T>(timeout: Duration, f: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    tokio::time::timeout(timeout, f())
        .await
        .map_err(|_| ServeError::Timeout(timeout.as_millis() as u64))?
}

// ============================================================================
// Cancellation
// ============================================================================

/// Sleep for `delay` unless the cancel flag is raised first.
///
/// Returns `true` if the sleep was interrupted by cancellation.
pub async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    let deadline = tokio::time::Instant::now() + delay;
    loop {
        if *cancel.borrow_and_update() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return false,
            changed = cancel.changed() => {
                if changed.is_err() {
                    // Sender dropped: nobody can cancel any more.
                    tokio::time::sleep_until(deadline).await;
                    return false;
                }
            }
        }
    }
}

/// Resolves once the cancel flag is raised.
///
/// Pends forever if the sender is dropped without raising it.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            if *cancel.borrow() {
                return;
            }
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tokio::time::sleep;

    #[test]
    fn test_retry_delay_calculation() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };

        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_retry_delay_capped() {
        let config = RetryConfig {
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(config.delay_for_attempt(10), Duration::from_secs(600));
    }

    #[test]
    fn test_retry_jitter_bounds() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            jitter: true,
            ..Default::default()
        };
        for _ in 0..50 {
            let delay = config.delay_for_attempt(1);
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(125));
        }
    }

    #[test]
    fn test_attempts_left() {
        let config = RetryConfig {
            max_attempts: 3,
            ..Default::default()
        };
        assert!(config.has_attempts_left(2));
        assert!(!config.has_attempts_left(3));
    }

    #[tokio::test]
    async fn test_timeout_wrapper() {
        let result: Result<u32> =
            with_timeout(Duration::from_secs(1), || async { Ok(42) }).await;
        assert_eq!(result.unwrap(), 42);

        let result: Result<u32> = with_timeout(Duration::from_millis(10), || async {
            sleep(Duration::from_millis(100)).await;
            Ok(42)
        })
        .await;
        assert!(matches!(result, Err(ServeError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_sleep_interrupted_by_cancel() {
        let (tx, mut rx) = watch::channel(false);
        let start = Instant::now();
        let handle = tokio::spawn(async move { sleep_or_cancel(Duration::from_secs(10), &mut rx).await });
        sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        assert!(handle.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_sleep_completes_without_cancel() {
        let (_tx, mut rx) = watch::channel(false);
        assert!(!sleep_or_cancel(Duration::from_millis(5), &mut rx).await);
    }

    #[tokio::test]
    async fn test_cancelled_resolves_on_flag() {
        let (tx, mut rx) = watch::channel(false);
        let handle = tokio::spawn(async move { cancelled(&mut rx).await });
        sleep(Duration::from_millis(10)).await;
        tx.send(true).unwrap();
        drop(tx);

        let result = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(result.is_ok());
    }
}
