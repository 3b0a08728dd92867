use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use raidsync_common::error::CommonError;

/// Queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of live items the queue will hold
    pub max_capacity: usize,
    /// Backoff after the first transient failure; doubles per attempt
    pub base_retry_delay: Duration,
    /// Cap applied to the exponential backoff
    pub max_retry_delay: Duration,
    /// Transient failures allowed before an item escalates to terminal
    /// `Failed`
    pub max_attempts: u32,
    /// Snapshot file for durability; `None` disables persistence
    pub persistence_path: Option<PathBuf>,
    /// Interval between background snapshot writes
    pub persistence_interval: Duration,
    /// Poll backoff for parked claimers while the queue is empty or
    /// budget-denied
    pub claim_backoff: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_capacity: 10_000,
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(3600), // 1 hour
            max_attempts: 5,
            persistence_path: None,
            persistence_interval: Duration::from_secs(30),
            claim_backoff: Duration::from_secs(1),
        }
    }
}

impl QueueConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), CommonError> {
        if self.max_capacity == 0 {
            return Err(CommonError::config_field("max_capacity", "must be greater than 0"));
        }

        if self.base_retry_delay.as_millis() == 0 {
            return Err(CommonError::config_field("base_retry_delay", "must be greater than 0"));
        }

        if self.max_retry_delay < self.base_retry_delay {
            return Err(CommonError::config_field(
                "max_retry_delay",
                "must not be below base_retry_delay",
            ));
        }

        if self.max_attempts == 0 {
            return Err(CommonError::config_field("max_attempts", "must be greater than 0"));
        }

        if self.claim_backoff.is_zero() {
            return Err(CommonError::config_field("claim_backoff", "must be greater than 0"));
        }

        Ok(())
    }

    /// Compute the retry delay for an item that has already failed
    /// `error_count` times, capped at `max_retry_delay`.
    pub fn retry_delay(&self, error_count: u32) -> Duration {
        // Cap the exponent so the multiplication cannot overflow
        let exp = error_count.min(10);
        let multiplier = 2_u128.saturating_pow(exp);
        let delay_ms = (self.base_retry_delay.as_millis().max(1)).saturating_mul(multiplier);

        Duration::from_millis(delay_ms.min(self.max_retry_delay.as_millis()) as u64)
    }
}

#[cfg(test)]
mod tests {
    //! Unit tests for queue configuration.
    use super::*;

    /// Validates `QueueConfig::default` values.
    ///
    /// Assertions:
    /// - Confirms the shipped defaults for capacity, backoff, and attempts.
    #[test]
    fn test_defaults() {
        let config = QueueConfig::default();

        assert_eq!(config.max_capacity, 10_000);
        assert_eq!(config.base_retry_delay, Duration::from_secs(1));
        assert_eq!(config.max_retry_delay, Duration::from_secs(3600));
        assert_eq!(config.max_attempts, 5);
        assert!(config.persistence_path.is_none());
    }

    /// Validates `validate` rejections for each out-of-range field.
    ///
    /// Assertions:
    /// - Ensures zero capacity, zero base delay, inverted delays, and zero
    ///   attempts are all rejected.
    #[test]
    fn test_validation() {
        assert!(QueueConfig::default().validate().is_ok());

        let config = QueueConfig { max_capacity: 0, ..QueueConfig::default() };
        assert!(config.validate().is_err());

        let config = QueueConfig { base_retry_delay: Duration::ZERO, ..QueueConfig::default() };
        assert!(config.validate().is_err());

        let config = QueueConfig {
            max_retry_delay: Duration::from_millis(10),
            ..QueueConfig::default()
        };
        assert!(config.validate().is_err());

        let config = QueueConfig { max_attempts: 0, ..QueueConfig::default() };
        assert!(config.validate().is_err());
    }

    /// Validates `retry_delay` exponential growth and capping.
    ///
    /// Assertions:
    /// - Confirms the delay doubles per failure starting at the base delay.
    /// - Confirms the configured cap bounds the delay.
    #[test]
    fn test_retry_delay() {
        let config = QueueConfig {
            base_retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(30),
            ..QueueConfig::default()
        };

        assert_eq!(config.retry_delay(0), Duration::from_secs(1));
        assert_eq!(config.retry_delay(1), Duration::from_secs(2));
        assert_eq!(config.retry_delay(2), Duration::from_secs(4));
        assert_eq!(config.retry_delay(4), Duration::from_secs(16));
        // Capped
        assert_eq!(config.retry_delay(5), Duration::from_secs(30));
        assert_eq!(config.retry_delay(30), Duration::from_secs(30));
    }
}
