//! Retry with exponential backoff
//!
//! One policy shared by every chain read and catalog request, instead of
//! ad hoc loops in each venue client.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Random extra delay as a fraction of the computed delay (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            multiplier: 2.0,
            max_delay_ms: 5_000,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Reject settings that cannot produce a delay
    pub fn check(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!("multiplier must be a finite number >= 1 (got {})", self.multiplier));
        }
        if !self.jitter.is_finite() || self.jitter < 0.0 {
            return Err(format!("jitter must be a finite non-negative fraction (got {})", self.jitter));
        }
        Ok(())
    }

    /// Delay before retry number `retry` (1-based), without jitter
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.multiplier.max(1.0).powi(retry.saturating_sub(1) as i32);
        let ms = (self.base_delay_ms as f64 * exp).min(self.max_delay_ms as f64);
        Duration::from_millis(ms as u64)
    }

    fn delay_with_jitter(&self, retry: u32) -> Duration {
        let base = self.backoff(retry);
        if !self.jitter.is_finite() || self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let extra = rand::thread_rng().gen_range(0.0..self.jitter);
        base.mul_f64(1.0 + extra)
    }

    /// Run `op` until it succeeds, `should_retry` rejects the error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, E, F, Fut, R>(&self, what: &str, should_retry: R, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && should_retry(&e) => {
                    let delay = self.delay_with_jitter(attempt);
                    debug!(
                        "{} failed (attempt {}/{}): {} - retrying in {:?}",
                        what, attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay_ms: 1,
            multiplier: 2.0,
            max_delay_ms: 4,
            jitter: 0.0,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            multiplier: 2.0,
            max_delay_ms: 300,
            jitter: 0.0,
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(300));
        assert_eq!(policy.backoff(4), Duration::from_millis(300));
    }

    #[test]
    fn test_check_rejects_unusable_settings() {
        assert!(RetryPolicy::default().check().is_ok());
        assert!(RetryPolicy { jitter: f64::NAN, ..RetryPolicy::default() }.check().is_err());
        assert!(RetryPolicy { jitter: -0.5, ..RetryPolicy::default() }.check().is_err());
        assert!(RetryPolicy { multiplier: f64::INFINITY, ..RetryPolicy::default() }.check().is_err());
        assert!(RetryPolicy { multiplier: 0.5, ..RetryPolicy::default() }.check().is_err());
    }

    #[test]
    fn test_nan_jitter_falls_back_to_plain_backoff() {
        let policy = RetryPolicy {
            jitter: f64::NAN,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_with_jitter(1), policy.backoff(1));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, String> = fast()
            .run("flaky", |_| true, move || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("fail {}", n)) } else { Ok(n) }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_stops_immediately() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = fast()
            .run("revert", |_| false, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("reverted".to_string())
            })
            .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), String> = fast()
            .run("down", |_| true, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err("down".to_string())
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }
}
