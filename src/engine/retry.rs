use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry budget for nodes using the `retry` error strategy
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    #[serde(default)]
    pub times: u32,
    /// Delay between retries in milliseconds; the engine default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    /// Whether to double the delay on each retry
    #[serde(default)]
    pub backoff: bool,
}

impl RetryConfig {
    pub fn new(times: u32, interval_ms: u64) -> Self {
        Self {
            times,
            interval: Some(interval_ms),
            backoff: false,
        }
    }

    /// Calculate delay for a given retry attempt (1-based)
    pub fn calculate_delay(&self, retry_count: u32, default_interval_ms: u64) -> Duration {
        let base = self.interval.unwrap_or(default_interval_ms);
        let delay = if self.backoff {
            let exponent = retry_count.saturating_sub(1).min(16);
            base.saturating_mul(2_u64.pow(exponent))
        } else {
            base
        };
        Duration::from_millis(delay)
    }

    /// Sleep for the retry delay, returning `false` if cancelled first
    pub async fn sleep(
        &self,
        retry_count: u32,
        default_interval_ms: u64,
        cancel: &CancellationToken,
    ) -> bool {
        let delay = self.calculate_delay(retry_count, default_interval_ms);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
