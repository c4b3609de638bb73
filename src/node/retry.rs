//! Bounded retry with HTTPS→HTTP fallback.
//!
//! Only [transient](NodeError::is_transient) failures are retried, and only
//! they cause a fall back to the next scheme. Anything else is returned
//! straight away.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use super::Scheme;
use crate::config::NodeConfig;
use crate::error::NodeError;

/// Attempts per scheme and linear backoff between them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&NodeConfig> for RetryPolicy {
    fn from(config: &NodeConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
        }
    }
}

impl RetryPolicy {
    /// Sleep after failed attempt `attempt` (1-based): 1s, 2s, ...
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// Run `op` until it succeeds, fails non-transiently, or runs out of attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, NodeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_after(attempt);
                warn!(
                    attempt,
                    "{label}: {e}, retrying in {}ms",
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Run `op` over HTTPS with retry; if every attempt failed transiently, run
/// it again over HTTP with the same policy. Returns the scheme that worked.
pub async fn with_fallback<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<(Scheme, T), NodeError>
where
    F: FnMut(Scheme) -> Fut,
    Fut: Future<Output = Result<T, NodeError>>,
{
    let mut last_err = None;
    for scheme in Scheme::FALLBACK_ORDER {
        debug!(%scheme, "{label}: trying");
        match with_retry(policy, label, || op(scheme)).await {
            Ok(value) => return Ok((scheme, value)),
            Err(e) if e.is_transient() => {
                warn!(%scheme, "{label}: unreachable over {scheme}: {e}");
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_err.unwrap_or_else(|| NodeError::Network("no transport attempted".into())))
}
