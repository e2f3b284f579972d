//! Retry and backoff used by checkpoint backends that talk to remote storage

mod backoff;
mod error;

pub use backoff::{Backoff, ExponentialBackoff, ExponentialBackoffBuilder};
pub use error::RetryError;

use std::future::Future;
use std::time::Duration;
use tokio::select;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (None for infinite)
    pub max_retries: Option<u32>,
    /// Initial backoff duration
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: Some(3),
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.initial_backoff, self.max_backoff)
    }
}

/// Helper for retrying operations with backoff
pub struct RetryHandle<B: Backoff> {
    config: RetryConfig,
    backoff: B,
    attempts: u32,
}

impl<B: Backoff> RetryHandle<B> {
    pub fn new(config: RetryConfig, backoff: B) -> Self {
        Self {
            config,
            backoff,
            attempts: 0,
        }
    }

    /// Retry an operation until it succeeds or the attempt budget is spent
    pub async fn retry<F, Fut, T, E>(&mut self, operation: F) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        // Keep the sender alive so `changed()` never resolves.
        let (_tx, mut rx) = watch::channel(false);
        self.retry_with_shutdown(operation, &mut rx).await
    }

    /// Retry an operation, giving up as soon as `shutdown` flips to true
    pub async fn retry_with_shutdown<F, Fut, T, E>(
        &mut self,
        mut operation: F,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        loop {
            if *shutdown.borrow() {
                return Err(RetryError::Interrupted);
            }

            self.attempts += 1;
            trace!(attempt = self.attempts, "Executing operation");

            let result = select! {
                result = operation() => result,
                _ = shutdown.changed() => {
                    debug!("Operation interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            };

            let e = match result {
                Ok(value) => {
                    debug!(attempts = self.attempts, "Operation succeeded");
                    return Ok(value);
                }
                Err(e) => e,
            };

            if let Some(max) = self.config.max_retries {
                if self.attempts >= max {
                    warn!(
                        attempts = self.attempts,
                        error = %e,
                        "Maximum retry attempts exceeded"
                    );
                    return Err(RetryError::MaxRetriesExceeded(self.attempts, e.to_string()));
                }
            }

            let delay = self.backoff.next_delay(self.attempts);
            warn!(
                attempt = self.attempts,
                delay_ms = ?delay.as_millis(),
                error = %e,
                "Operation failed, retrying after delay"
            );

            select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    debug!("Retry interrupted by shutdown signal");
                    return Err(RetryError::Interrupted);
                }
            }
        }
    }

    /// Reset the retry counter
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::mocks::MockBackoff;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_config(max_retries: Option<u32>) -> RetryConfig {
        RetryConfig {
            max_retries,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() -> anyhow::Result<()> {
        let config = fast_config(Some(5));
        let mut retry = RetryHandle::new(config.clone(), config.backoff());

        let counter = Arc::new(AtomicU32::new(0));
        let result = retry
            .retry(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result?, "success");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(retry.attempts(), 3);

        retry.reset();
        assert_eq!(retry.attempts(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_retry_consults_backoff_between_attempts() {
        let backoff = MockBackoff::new(vec![Duration::from_millis(1), Duration::from_millis(2)]);
        let mut retry = RetryHandle::new(fast_config(Some(3)), backoff.clone());

        let result: Result<(), _> = retry.retry(|| async { Err("always fails") }).await;

        assert!(result.is_err());
        // No delay after the final attempt
        assert_eq!(backoff.get_call_count(), 2);
    }

    #[tokio::test]
    async fn test_retry_max_attempts() {
        let config = fast_config(Some(2));
        let mut retry = RetryHandle::new(config.clone(), config.backoff());

        let result: Result<(), _> = retry.retry(|| async { Err("always fails") }).await;

        assert!(matches!(result, Err(RetryError::MaxRetriesExceeded(2, _))));
        assert!(result.unwrap_err().is_max_retries());
    }

    #[tokio::test]
    async fn test_retry_shutdown() -> anyhow::Result<()> {
        let config = RetryConfig::default();
        let mut retry = RetryHandle::new(config.clone(), config.backoff());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            retry
                .retry_with_shutdown(
                    || async {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        Err::<(), _>("never succeeds")
                    },
                    &mut shutdown_rx,
                )
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true)?;

        let result = handle.await?;
        assert!(matches!(result, Err(RetryError::Interrupted)));
        Ok(())
    }
}
