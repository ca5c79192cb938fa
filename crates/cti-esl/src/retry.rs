//! Fixed-delay connect retry

use cti_core::config::ReconnectConfig;
use cti_core::{AppError, AppResult};
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Attempts and spacing for the initial connect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&ReconnectConfig> for RetryPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: Duration::from_secs(config.delay_secs),
        }
    }
}

/// Run `attempt` until it succeeds, a non-retryable error occurs, or the
/// policy is exhausted. The delay is only slept between attempts.
pub async fn connect_with_retry<T, F, Fut>(policy: &RetryPolicy, mut attempt: F) -> AppResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::new();

    for n in 1..=max_attempts {
        match attempt(n).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => {
                error!(attempt = n, error = %e, "Connect failed permanently");
                return Err(e);
            }
            Err(e) => {
                warn!(
                    attempt = n,
                    max_attempts,
                    error = %e,
                    "Connect attempt failed"
                );
                last_error = e.to_string();
            }
        }

        if n < max_attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }

    Err(AppError::RetriesExhausted {
        attempts: max_attempts,
        last_error,
    })
}
