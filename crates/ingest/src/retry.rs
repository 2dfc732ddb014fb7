//! Fixed-delay retry for transient failures.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

use blade_catalog::CatalogError;
use blade_core::config::SyncConfig;
use blade_storage::StoreError;

/// Errors that know whether another attempt may succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for CatalogError {
    fn is_retryable(&self) -> bool {
        CatalogError::is_retryable(self)
    }
}

/// Connection-level database failures may clear; missing or corrupt rows
/// will not.
impl Retryable for StoreError {
    fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Database(_) | StoreError::Other(_))
    }
}

/// Final result of a retried operation.
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    /// Total calls made, including the first.
    pub attempts: u32,
}

impl<T, E> Attempted<T, E> {
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    pub fn from_config(cfg: &SyncConfig) -> Self {
        Self::new(cfg.max_retries, cfg.retry_delay())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }

    /// Call `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// `op` receives the 1-based attempt number.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Attempted<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op(attempt).await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    }
                }
                Err(e) if e.is_retryable() && attempt <= self.max_retries => {
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        "transient failure, retrying"
                    );
                    if !self.delay.is_zero() {
                        tokio::time::sleep(self.delay).await;
                    }
                }
                Err(e) => {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries, Duration::from_millis(10))
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = &AtomicU32::new(0);
        let out = policy(3)
            .run(move |_| async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(CatalogError::Unavailable("HTTP 503: busy".into()))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(*out.result.as_ref().unwrap(), "done");
        assert_eq!(out.attempts, 3);
        assert_eq!(out.retries(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_retries() {
        let calls = &AtomicU32::new(0);
        let out: Attempted<(), _> = policy(3)
            .run(move |_| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CatalogError::Timeout)
            })
            .await;
        assert_eq!(out.result.unwrap_err(), CatalogError::Timeout);
        assert_eq!(out.attempts, 4);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn store_errors_retry_only_when_transient() {
        assert!(StoreError::Other("connection reset".into()).is_retryable());
        assert!(!StoreError::NotFound(uuid::Uuid::nil()).is_retryable());
        assert!(!StoreError::Decode("bad status".into()).is_retryable());
    }

    #[tokio::test]
    async fn permanent_failure_is_not_retried() {
        let out: Attempted<(), _> = policy(3)
            .run(|_| async {
                Err(CatalogError::Rejected {
                    status: 400,
                    message: "bad marking".into(),
                })
            })
            .await;
        assert_eq!(out.attempts, 1);
        assert!(out.result.is_err());
    }

    #[tokio::test]
    async fn zero_retries_means_one_attempt() {
        let out: Attempted<(), _> = policy(0)
            .run(|n| async move {
                assert_eq!(n, 1);
                Err(CatalogError::Unavailable("down".into()))
            })
            .await;
        assert_eq!(out.attempts, 1);
        assert_eq!(policy(0).max_attempts(), 1);
    }
}
