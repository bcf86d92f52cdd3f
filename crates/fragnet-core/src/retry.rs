//! Bounded retry with exponential backoff
//!
//! Per-fragment work (node pushes, root registration, fragment fetches)
//! retries transient collaborator failures locally. Permanent failures stop
//! immediately. Every attempt and every backoff sleep runs under the shared
//! [`TransferContext`], so cancellation interrupts a retry loop promptly.

use crate::context::TransferContext;
use crate::error::{Error, ServiceError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Retry configuration with exponential backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt
    pub max_retries: u32,

    /// Initial backoff duration
    #[serde(with = "crate::options::millis", rename = "initial_backoff_ms")]
    pub initial_backoff: Duration,

    /// Maximum backoff duration
    #[serde(with = "crate::options::millis", rename = "max_backoff_ms")]
    pub max_backoff: Duration,

    /// Backoff multiplier
    pub multiplier: f64,

    /// Add random jitter to prevent thundering herd
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Configuration that never waits between attempts
    #[must_use]
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
            multiplier: 1.0,
            jitter: false,
        }
    }

    /// Total attempts including the first one
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Calculate backoff duration for attempt number
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let base = self.initial_backoff.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped = base.min(self.max_backoff.as_millis() as f64);

        let duration = if self.jitter {
            // Add up to 25% jitter
            use getrandom::getrandom;
            let mut buf = [0u8; 4];
            let _ = getrandom(&mut buf);
            let jitter_factor = (u32::from_le_bytes(buf) % 25) as f64 / 100.0;
            capped * (1.0 + jitter_factor)
        } else {
            capped
        };

        Duration::from_millis(duration as u64)
    }

    /// Check the configuration is usable
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for a multiplier below 1.0 or an
    /// initial backoff larger than the maximum.
    pub fn validate(&self) -> crate::Result<()> {
        if !(self.multiplier >= 1.0) {
            return Err(Error::invalid_config("retry multiplier must be >= 1.0"));
        }
        if self.initial_backoff > self.max_backoff {
            return Err(Error::invalid_config(
                "initial backoff must not exceed max backoff",
            ));
        }
        Ok(())
    }
}

/// Why a retried operation gave up
#[derive(Debug, Clone)]
pub enum RetryError {
    /// The collaborator kept failing, or failed permanently
    Service {
        /// Attempts made
        attempts: u32,
        /// Last failure
        error: ServiceError,
    },
    /// The context was cancelled or its deadline elapsed
    Aborted(Error),
}

/// Run `op` until it succeeds, fails permanently, or the budget is spent
///
/// `op` receives the zero-based attempt number.
pub async fn with_retry<T, F, Fut>(
    ctx: &TransferContext,
    config: &RetryConfig,
    mut op: F,
) -> Result<T, RetryError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let max_attempts = config.max_attempts();
    let mut attempt = 0;

    loop {
        match ctx.run(op(attempt)).await.map_err(RetryError::Aborted)? {
            Ok(value) => return Ok(value),
            Err(error) if !error.is_transient() || attempt + 1 >= max_attempts => {
                return Err(RetryError::Service {
                    attempts: attempt + 1,
                    error,
                });
            }
            Err(error) => {
                let backoff = config.backoff_duration(attempt);
                tracing::debug!(
                    "Attempt {} failed ({}), retrying in {:?}",
                    attempt + 1,
                    error,
                    backoff
                );
                ctx.sleep(backoff).await.map_err(RetryError::Aborted)?;
                attempt += 1;
            }
        }
    }
}
