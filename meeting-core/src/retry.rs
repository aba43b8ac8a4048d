//! Bounded retry with exponential backoff.
//!
//! Two independent budgets exist per generation call:
//! - transport retries (handled here): the gateway never answered, so the
//!   identical request is re-sent after a backoff;
//! - repair re-prompts (handled by the caller): the gateway answered but
//!   the payload failed extraction or validation, so the *prompt* changes
//!   before the next attempt.
//! Mixing the two would let a malformed reply burn the transport budget,
//! which is why this module never inspects payloads.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry budgets and pacing for gateway calls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Re-sends after a transport failure (attempts = this + 1).
    pub max_transport_retries: u32,
    /// Repair re-prompts after a malformed or invalid payload.
    pub max_repair_retries: u32,
    /// First backoff delay; doubles per transport retry.
    pub base_backoff_ms: u64,
    /// Hard timeout for a single gateway call.
    pub request_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transport_retries: 2,
            max_repair_retries: 2,
            base_backoff_ms: 250,
            request_timeout_secs: 90,
        }
    }
}

impl RetryPolicy {
    /// Backoff before transport retry `n` (1-based): base · 2^(n-1).
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.base_backoff_ms.saturating_mul(factor))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Total attempts allowed at the payload level.
    pub fn max_attempts(&self) -> u32 {
        self.max_repair_retries + 1
    }
}

/// Run `op` until it succeeds or the transport budget is exhausted.
///
/// Returns the last error when every attempt failed.
pub async fn with_backoff<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_err = None;
    for attempt in 0..=policy.max_transport_retries {
        if attempt > 0 {
            let delay = policy.backoff_delay(attempt);
            tracing::warn!(label, attempt, delay_ms = delay.as_millis() as u64, "transport retry");
            tokio::time::sleep(delay).await;
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::warn!(label, attempt, error = %e, "transport attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.expect("at least one attempt runs"))
}
