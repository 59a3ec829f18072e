//! Retry policy with exponential/linear/fixed backoff and jitter (C2, spec §4.2).

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffType {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction in `[0, 1]`; the delay is multiplied by `1 + rand[0, jitter)`.
    pub jitter: f64,
    pub backoff_type: BackoffType,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
            backoff_type: BackoffType::Exponential,
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `n` (`n > 1`), per spec §4.2:
    /// `min(max_delay, base_delay * multiplier^(n-2)) * (1 + rand[0, jitter))`,
    /// so the first retry (`n = 2`) equals `base_delay`.
    pub fn delay_for_attempt(&self, n: u32) -> Duration {
        debug_assert!(n > 1, "no delay precedes the first attempt");
        let exponent = (n - 2) as i32;

        let raw = match self.backoff_type {
            BackoffType::Fixed => self.base_delay,
            BackoffType::Linear => self.base_delay.mul_f64((n - 1) as f64),
            BackoffType::Exponential => self.base_delay.mul_f64(self.multiplier.powi(exponent)),
        };

        let clamped = raw.min(self.max_delay);
        let jitter_factor = 1.0 + rand::thread_rng().gen_range(0.0..self.jitter.max(f64::EPSILON));
        let jitter_factor = if self.jitter <= 0.0 { 1.0 } else { jitter_factor };
        clamped.mul_f64(jitter_factor)
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    Cancelled,
    Exhausted(E),
}

impl<E: std::fmt::Display> std::fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetryError::Cancelled => write!(f, "operation was cancelled"),
            RetryError::Exhausted(e) => write!(f, "retries exhausted: {e}"),
        }
    }
}

/// Runs `op` up to `policy.max_attempts` times, retrying only while
/// `is_retryable` returns true for the error and `cancel` has not fired.
/// Returns `RetryError::Cancelled` promptly if cancellation fires mid-call
/// or mid-sleep.
pub async fn retry<T, E, Fut, Op, Pred>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: Op,
    is_retryable: Pred,
) -> Result<T, RetryError<E>>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    Pred: Fn(&E) -> bool,
{
    for attempt in 1..=policy.max_attempts {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            r = op(attempt) => r,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !is_retryable(&err) {
                    return Err(RetryError::Exhausted(err));
                }
                let delay = policy.delay_for_attempt(attempt + 1);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(RetryError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    }
    unreachable!("loop always returns by the last attempt")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn exponential_delay_grows_and_is_clamped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            multiplier: 2.0,
            jitter: 0.0,
            backoff_type: BackoffType::Exponential,
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(400));
        // 100 * 2^3 = 800, clamped to 500
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(500));
    }

    #[test]
    fn fixed_delay_is_constant() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.0,
            backoff_type: BackoffType::Fixed,
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<&str>> = retry(
            &policy,
            &cancel,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            |_e: &&str| true,
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 1.0,
            jitter: 0.0,
            backoff_type: BackoffType::Fixed,
        };
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<&str>> = retry(
            &policy,
            &cancel,
            |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err("retryable")
                    } else {
                        Ok(7)
                    }
                }
            },
            |_e: &&str| true,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_non_retryable_errors() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let result: Result<i32, RetryError<&str>> = retry(
            &policy,
            &cancel,
            |_attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            },
            |_e: &&str| false,
        )
        .await;
        assert!(matches!(result, Err(RetryError::Exhausted("fatal"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancellation_short_circuits_immediately() {
        let policy = RetryPolicy::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: Result<i32, RetryError<&str>> =
            retry(&policy, &cancel, |_attempt| async { Err("x") }, |_e: &&str| true).await;
        assert!(matches!(result, Err(RetryError::Cancelled)));
    }
}
