//! Retry logic with linear or exponential backoff
//!
//! Wraps the API call sites (profile, post detail, listing page). Transport
//! failures and configured HTTP statuses are retried; everything else fails on
//! the first attempt.
//!
//! # Example
//!
//! ```no_run
//! use kemono_sync::retry::with_retry;
//! use kemono_sync::config::RetryConfig;
//! use kemono_sync::error::Error;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Error> {
//! let config = RetryConfig::exponential(Duration::from_secs(5));
//! let body = with_retry(&config, "fetch_post", || async {
//!     Ok::<_, Error>("post".to_string())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::{Backoff, RetryConfig};
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;

/// How a failure should be treated by the retry loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryClass {
    /// Timeout or connection-level failure, always worth another attempt
    Transient,
    /// HTTP status failure; retried only if the status is in the retry set
    Status(u16),
    /// Never retried
    Permanent,
}

/// Trait for errors that can be classified for retrying
pub trait IsRetryable {
    /// Classify this failure
    fn retry_class(&self) -> RetryClass;
}

impl IsRetryable for Error {
    fn retry_class(&self) -> RetryClass {
        match self {
            Error::Network(e) => {
                if let Some(status) = e.status() {
                    RetryClass::Status(status.as_u16())
                } else if e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e.is_decode()
                    || dropped_connection(e)
                {
                    RetryClass::Transient
                } else {
                    RetryClass::Permanent
                }
            }
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::TimedOut
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
                | std::io::ErrorKind::BrokenPipe
                | std::io::ErrorKind::UnexpectedEof => RetryClass::Transient,
                _ => RetryClass::Permanent,
            },
            Error::Http { status, .. } => RetryClass::Status(*status),
            Error::Config { .. }
            | Error::Serialization(_)
            | Error::RetriesExhausted { .. }
            | Error::InvalidUrl(_)
            | Error::InvalidRule(_)
            | Error::NotFound(_)
            | Error::Store { .. }
            | Error::Cancelled
            | Error::Other(_) => RetryClass::Permanent,
        }
    }
}

/// True when an I/O error somewhere in the source chain means the peer went away
fn dropped_connection(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = err.source();
    while let Some(cause) = current {
        if let Some(io) = cause.downcast_ref::<std::io::Error>()
            && matches!(
                io.kind(),
                std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::UnexpectedEof
            )
        {
            return true;
        }
        current = cause.source();
    }
    false
}

impl RetryConfig {
    /// Whether a failure may be retried under this configuration
    pub fn is_retryable(&self, err: &impl IsRetryable) -> bool {
        match err.retry_class() {
            RetryClass::Transient => true,
            RetryClass::Status(status) => self.retry_status.contains(&status),
            RetryClass::Permanent => false,
        }
    }

    /// Wait before retry number `attempt` (1-based; the first attempt never waits)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let secs = match self.backoff {
            Backoff::Linear => base * f64::from(attempt),
            Backoff::Exponential => base.powi(attempt.min(i32::MAX as u32) as i32),
        };
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Execute an async operation under a retry configuration
///
/// `max_attempts` counts every attempt including the first. Retryable failures
/// that run out of attempts are wrapped in [`Error::RetriesExhausted`];
/// non-retryable failures are returned unchanged after a single attempt.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt: u32 = 0;

    loop {
        if attempt > 0 {
            let delay = config.delay_for(attempt);
            tracing::debug!(
                operation,
                attempt = attempt + 1,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Waiting before retry"
            );
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(operation, attempts = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if config.is_retryable(&e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    tracing::error!(
                        operation,
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                    return Err(Error::RetriesExhausted {
                        operation: operation.to_string(),
                        attempts: attempt,
                        source: Box::new(e),
                    });
                }
                tracing::warn!(
                    operation,
                    error = %e,
                    attempt,
                    max_attempts,
                    "Operation failed, will retry"
                );
            }
            Err(e) => {
                tracing::error!(operation, error = %e, "Operation failed with non-retryable error");
                return Err(e);
            }
        }
    }
}
