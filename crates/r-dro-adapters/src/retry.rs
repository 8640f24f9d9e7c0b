//! ---
//! dro_section: "05-external-interfaces"
//! dro_subsection: "module"
//! dro_type: "source"
//! dro_scope: "code"
//! dro_description: "Collaborator API adapters and retry policy."
//! dro_version: "v0.1.0"
//! dro_owner: "tbd"
//! ---
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::Result;

/// Bounded exponential backoff applied to idempotent collaborator calls.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries, for calls that must not double-fire.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }
}

/// Run an idempotent operation, retrying transient failures with exponential
/// backoff and jitter. Permanent errors are returned immediately.
pub async fn retry_idempotent<T, F, Fut>(what: &str, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts.max(1) => {
                let jitter = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2);
                let wait = backoff + Duration::from_millis(jitter);
                debug!(call = what, attempt, error = %err, wait_ms = wait.as_millis() as u64, "transient failure; backing off");
                tokio::time::sleep(wait).await;
                backoff = (backoff * 2).min(policy.max_backoff);
            }
            Err(err) => {
                if attempt > 1 {
                    warn!(call = what, attempts = attempt, error = %err, "call failed after retries");
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AdapterError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = retry_idempotent("test", &fast_policy(5), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(AdapterError::Status(503))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent("test", &fast_policy(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Validation("bad weights".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = retry_idempotent("test", &fast_policy(3), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(AdapterError::Transport("refused".into())) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
