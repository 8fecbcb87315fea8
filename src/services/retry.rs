//! Fixed-interval retry helper
//!
//! Every call against the cluster goes through [`RetryPolicy::run`]: a fixed number
//! of attempts with a fixed pause between them and no backoff. The last error is
//! wrapped as `Retries (n/m) exceeded: <cause>`.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

/// Attempt count and pause between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            interval,
        }
    }

    /// Single attempt, no waiting
    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds or attempts are exhausted.
    ///
    /// There is no pause after the final attempt.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut tries = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    tries += 1;
                    if tries >= attempts {
                        return Err(err.context(format!("Retries ({}/{}) exceeded", tries, attempts)));
                    }
                    debug!(
                        "attempt {}/{} failed: {:#}, retrying in {:?}",
                        tries, attempts, err, self.interval
                    );
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_succeeds_after_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(3, Duration::ZERO);

        let counter = calls.clone();
        let result = policy
            .run(|| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        anyhow::bail!("not yet");
                    }
                    Ok(42)
                }
            })
            .await
            .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausted_error_message() {
        let policy = RetryPolicy::new(2, Duration::ZERO);
        let err = policy
            .run(|| async { Err::<(), _>(anyhow::anyhow!("connection refused")) })
            .await
            .unwrap_err();

        assert_eq!(
            format!("{:#}", err),
            "Retries (2/2) exceeded: connection refused"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_sleep_after_last_attempt() {
        let policy = RetryPolicy::new(3, Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        let _ = policy
            .run(|| async { Err::<(), _>(anyhow::anyhow!("fail")) })
            .await;
        assert_eq!(started.elapsed(), Duration::from_secs(60));
    }

    #[test]
    fn test_first_success_returns_immediately() {
        let policy = RetryPolicy::default();
        let value = tokio_test::block_on(policy.run(|| async { Ok::<_, anyhow::Error>("up") }));
        assert_eq!(tokio_test::assert_ok!(value), "up");
    }

    #[test]
    fn test_zero_attempts_runs_once() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).attempts, 1);
    }
}
