//! Bounded store calls with a single retry
//!
//! Every `SessionStore` call made by the services goes through
//! [`StorePolicy::call`]. Each attempt is capped by a timeout; a timeout or a
//! `StoreError::Transient` is retried once after a short delay. Logic
//! failures (conflict, not found, backend errors) are never retried.

use metacat_core::{AuthError, StoreConfig, StoreError};
use std::future::Future;
use std::time::Duration;

/// Retries allowed after the first attempt
const MAX_RETRIES: u32 = 1;

/// Timeout and retry settings for store calls
#[derive(Debug, Clone, Copy)]
pub struct StorePolicy {
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self::from_config(&StoreConfig::default())
    }
}

impl StorePolicy {
    pub fn from_config(config: &StoreConfig) -> Self {
        Self {
            timeout: config.timeout(),
            retry_delay: config.retry_delay(),
        }
    }

    /// Run a store operation under the policy
    ///
    /// `op` names the operation in logs. The closure is invoked once per
    /// attempt, so it must build a fresh future each time.
    pub async fn call<T, F, Fut>(&self, op: &'static str, mut f: F) -> Result<T, AuthError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt = 0;
        loop {
            let failure = match tokio::time::timeout(self.timeout, f()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if e.is_transient() => e.to_string(),
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => format!("{op} timed out after {}ms", self.timeout.as_millis()),
            };

            if attempt >= MAX_RETRIES {
                tracing::error!(op, error = %failure, "Store call failed after retry");
                return Err(AuthError::Transient(failure));
            }

            attempt += 1;
            tracing::warn!(op, attempt, error = %failure, "Store call failed, retrying");
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> StorePolicy {
        StorePolicy {
            timeout: Duration::from_millis(50),
            retry_delay: Duration::from_millis(1),
        }
    }

    #[tokio::test]
    async fn test_success_is_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy()
            .call("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, StoreError>(7)
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = policy()
            .call("op", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(StoreError::Transient("connection reset".to_string()))
                } else {
                    Ok("recovered")
                }
            })
            .await;

        assert_eq!(result, Ok("recovered"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_transient() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy()
            .call("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transient("down".to_string()))
            })
            .await;

        assert!(matches!(result, Err(AuthError::Transient(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_logic_failures_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy()
            .call("op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Conflict("username".to_string()))
            })
            .await;

        assert_eq!(result, Err(AuthError::Conflict("username".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = policy()
            .call("slow_op", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        match result {
            Err(AuthError::Transient(msg)) => assert!(msg.contains("slow_op timed out")),
            other => panic!("expected transient failure, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
