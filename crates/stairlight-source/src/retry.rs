//! Timeout and retry with exponential backoff for backend calls

use crate::backend::SourceAccessError;
use stairlight_core::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Delay before attempt `attempt + 1`
fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
    let delay_ms = policy.base_delay_ms.saturating_mul(factor).min(policy.max_delay_ms);
    Duration::from_millis(delay_ms)
}

/// Run `operation` under the policy's timeout, retrying transient failures
///
/// Non-transient errors are returned immediately. After `max_attempts`
/// the last error is returned.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    backend: &str,
    path: &str,
    mut operation: F,
) -> Result<T, SourceAccessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceAccessError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let timeout = Duration::from_secs(policy.timeout_secs);
    let mut attempt = 1;

    loop {
        debug!("{} {}: attempt {} of {}", backend, path, attempt, max_attempts);

        let result = match tokio::time::timeout(timeout, operation()).await {
            Ok(result) => result,
            Err(_) => Err(SourceAccessError::Timeout {
                backend: backend.to_string(),
                path: path.to_string(),
                seconds: policy.timeout_secs,
            }),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!("{} {}: succeeded on attempt {}", backend, path, attempt);
                }
                return Ok(value);
            }
            Err(error) if error.is_transient() && attempt < max_attempts => {
                let delay = backoff_delay(policy, attempt);
                warn!("{} (attempt {}), retrying in {:?}", error, attempt, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
