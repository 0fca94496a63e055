use std::future::Future;
use std::time::Duration;

use crate::config::TransactionConfig;
use crate::error::AppResult;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl From<&TransactionConfig> for RetryPolicy {
    fn from(config: &TransactionConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            interval: config.retry_interval(),
        }
    }
}

/// Runs `op` again when it fails with a transient transaction conflict, at
/// most `max_attempts` times in total.
pub async fn retry_transaction<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                log::warn!(
                    "Transaction conflict on attempt {}/{}: {}. Retrying.",
                    attempt,
                    policy.max_attempts,
                    e
                );
                attempt += 1;
                tokio::time::sleep(policy.interval).await;
            }
            Err(e) => return Err(e),
        }
    }
}
