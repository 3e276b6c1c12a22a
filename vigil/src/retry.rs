// vigil/src/retry.rs
//
// Reusable retry policy for calls to external collaborators: bounded
// attempts, exponential backoff, uniform jitter. Applied explicitly at each
// call site rather than hidden inside the clients.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::Result;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, jitter: bool) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            jitter,
        }
    }

    /// Run `op` until it succeeds or `max_attempts` is exhausted; the last
    /// error is returned as-is. Delay doubles each attempt, plus up to
    /// 500 ms of jitter.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt >= self.max_attempts.max(1) => return Err(e),
                Err(e) => {
                    let mut delay = self.base_delay * (1 << (attempt - 1).min(16));
                    if self.jitter {
                        delay += Duration::from_millis(rand::thread_rng().gen_range(0..500));
                    }
                    warn!(
                        "[attempt {}/{}] {} failed: {}. Retrying in {:.2}s",
                        attempt,
                        self.max_attempts,
                        what,
                        e,
                        delay.as_secs_f64()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn flaky(fail_times: u32, calls: &AtomicU32) -> impl Future<Output = Result<u32>> + '_ {
        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
        async move {
            if n <= fail_times {
                Err(Error::AnalysisCallFailed(format!("attempt {n}")))
            } else {
                Ok(n)
            }
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10), false);
        let got = policy.run("flaky", || flaky(2, &calls)).await.unwrap();
        assert_eq!(got, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausts_attempts_and_returns_last_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(10), false);
        let err = policy.run("flaky", || flaky(99, &calls)).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(err.to_string().contains("attempt 3"));
    }

    #[tokio::test]
    async fn single_attempt_policy_never_sleeps() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(1, Duration::from_secs(3600), true);
        let err = policy.run("flaky", || flaky(99, &calls)).await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, Error::AnalysisCallFailed(_)));
    }
}
