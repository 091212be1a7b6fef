use crate::llm::error::AnalysisError;
use std::future::Future;
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 1;
const DEFAULT_BASE_BACKOFF: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff: DEFAULT_BASE_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (1-based): base, 2×base, 4×base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        self.base_backoff
            .saturating_mul(1u32 << retry.saturating_sub(1).min(16))
    }
}

/// Runs `op`, retrying only errors that report themselves as retryable.
pub async fn with_retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, AnalysisError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AnalysisError>>,
{
    let mut retries: u32 = 0;
    loop {
        match op().await {
            Ok(out) => return Ok(out),
            Err(err) => {
                if !err.is_retryable() || retries >= policy.max_retries {
                    return Err(err);
                }
                retries += 1;
                let backoff = policy.backoff(retries);
                tracing::warn!(
                    retry = retries,
                    ?backoff,
                    kind = err.kind.as_str(),
                    error = %err,
                    "analysis call failed; retrying"
                );
                tokio::time::sleep(backoff).await;
            }
        }
    }
}
