use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::shared::ValidationError;

/// Configuration for lanes that pull records and hand them to subscribers.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConsumerConfig {
    /// Maximum number of records fetched from a shard in one batch.
    #[serde(default = "default_max_records")]
    pub max_records: usize,
    /// Time, in milliseconds, a lane waits before polling again when its shard had no records.
    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
}

impl ConsumerConfig {
    /// Default maximum number of records per batch.
    pub const DEFAULT_MAX_RECORDS: usize = 100;

    /// Default idle poll interval in milliseconds.
    pub const DEFAULT_IDLE_POLL_INTERVAL_MS: u64 = 200;

    /// Returns the idle poll interval as a [`Duration`].
    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.idle_poll_interval_ms)
    }

    /// Validates consumer configuration settings.
    ///
    /// Ensures max_records is non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_records == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "consumer.max_records".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_records(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
        }
    }
}

fn default_max_records() -> usize {
    ConsumerConfig::DEFAULT_MAX_RECORDS
}

fn default_idle_poll_interval_ms() -> u64 {
    ConsumerConfig::DEFAULT_IDLE_POLL_INTERVAL_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config: ConsumerConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, ConsumerConfig::default());
        assert_eq!(config.idle_poll_interval(), Duration::from_millis(200));
    }

    #[test]
    fn zero_max_records_is_rejected() {
        let config = ConsumerConfig {
            max_records: 0,
            ..ConsumerConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
