//! Retry with exponential backoff for local database writes.
//!
//! Only transient failures are retried:
//! - `SQLITE_BUSY` / `SQLITE_LOCKED` (another connection holds the lock)
//!
//! Everything else (bad SQL, corruption, unopenable files) fails immediately.

use std::time::Duration;

use skiscore_core::{DatabaseError, StorageConfig};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;
pub const DEFAULT_MAX_DELAY_MS: u64 = 2000;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try
    pub max_retries: u32,
    /// Initial delay between retries (doubles each attempt)
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
        }
    }
}

impl From<&StorageConfig> for RetryConfig {
    fn from(storage: &StorageConfig) -> Self {
        Self::new(
            storage.insert_retries,
            storage.retry_initial_delay_ms,
            storage.retry_max_delay_ms,
        )
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, initial_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(initial_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(0, 0, 0)
    }

    /// Calculate the delay for a given attempt number
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        // initial_delay * 2^attempt, capped
        let factor = 2u64.saturating_pow(attempt);
        let initial_ms = u64::try_from(self.initial_delay.as_millis()).unwrap_or(u64::MAX);
        let max_ms = u64::try_from(self.max_delay.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }
}

/// Error classification for retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry,
    NoRetry,
}

impl From<&DatabaseError> for RetryDecision {
    fn from(error: &DatabaseError) -> Self {
        if error.is_transient() {
            RetryDecision::Retry
        } else {
            RetryDecision::NoRetry
        }
    }
}

/// Run a blocking database operation, retrying transient failures.
///
/// Sleeps on the calling thread between attempts, so call it from a
/// blocking context.
///
/// # Errors
/// Returns the first non-transient error, or the last transient error once
/// retries are exhausted.
pub fn with_retry<T, F>(config: &RetryConfig, mut operation: F) -> Result<T, DatabaseError>
where
    F: FnMut() -> Result<T, DatabaseError>,
{
    let mut attempt: u32 = 0;

    loop {
        match operation() {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!("Database write succeeded after {} retries", attempt);
                }
                return Ok(value);
            }
            Err(e) => {
                if RetryDecision::from(&e) == RetryDecision::NoRetry {
                    tracing::debug!("Non-retryable database error: {}", e);
                    return Err(e);
                }

                if attempt >= config.max_retries {
                    tracing::error!("All {} database attempts exhausted", attempt + 1);
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "Retryable error on attempt {} of {}: {}, waiting {:?}",
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.initial_delay, Duration::from_millis(100));
        assert_eq!(config.max_delay, Duration::from_millis(2000));
    }

    #[test]
    fn test_config_from_storage_section() {
        let config = RetryConfig::from(&StorageConfig::default());
        assert_eq!(config, RetryConfig::default());
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig::new(3, 100, 5000);

        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let config = RetryConfig::new(10, 100, 1000);

        assert_eq!(config.delay_for_attempt(4), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(63), Duration::from_millis(1000));
        assert_eq!(config.delay_for_attempt(u32::MAX), Duration::from_millis(1000));
    }

    #[test]
    fn test_retry_decision() {
        assert_eq!(
            RetryDecision::from(&DatabaseError::Busy("locked".into())),
            RetryDecision::Retry
        );
        assert_eq!(
            RetryDecision::from(&DatabaseError::QueryFailed("syntax".into())),
            RetryDecision::NoRetry
        );
        assert_eq!(
            RetryDecision::from(&DatabaseError::Corruption("bad page".into())),
            RetryDecision::NoRetry
        );
    }

    #[test]
    fn test_busy_retried_until_success() {
        let mut calls = 0;
        let result = with_retry(&RetryConfig::new(3, 1, 1), || {
            calls += 1;
            if calls < 3 {
                Err(DatabaseError::Busy("locked".into()))
            } else {
                Ok(42)
            }
        });

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_busy_gives_up_after_max_retries() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryConfig::new(2, 1, 1), || {
            calls += 1;
            Err(DatabaseError::Busy("locked".into()))
        });

        assert!(matches!(result, Err(DatabaseError::Busy(_))));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_permanent_error_not_retried() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryConfig::new(5, 1, 1), || {
            calls += 1;
            Err(DatabaseError::QueryFailed("no such table".into()))
        });

        assert!(matches!(result, Err(DatabaseError::QueryFailed(_))));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_no_retries_config() {
        let mut calls = 0;
        let result: Result<(), _> = with_retry(&RetryConfig::none(), || {
            calls += 1;
            Err(DatabaseError::Busy("locked".into()))
        });

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
