use serde::{Deserialize, Serialize};

use crate::load::Config;
use crate::shared::{ConsumerConfig, PublisherConfig, ValidationError};

/// Configuration of the relay service.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Topic the relay publishes to and subscribes on.
    pub topic: String,
    /// Number of shards created for the topic.
    #[serde(default = "default_shard_count")]
    pub shard_count: usize,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl RelayConfig {
    /// Default number of shards.
    pub const DEFAULT_SHARD_COUNT: usize = 4;

    /// Validates the relay configuration and all nested sections.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.topic.trim().is_empty() {
            return Err(ValidationError::EmptyTopic);
        }

        if self.shard_count == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "shard_count".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        self.consumer.validate()?;
        self.publisher.validate()
    }
}

impl Config for RelayConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        RelayConfig::validate(self)
    }
}

fn default_shard_count() -> usize {
    RelayConfig::DEFAULT_SHARD_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_nested_sections() {
        let mut config: RelayConfig = serde_json::from_str(r#"{ "topic": "orders" }"#).unwrap();
        assert_eq!(config.shard_count, RelayConfig::DEFAULT_SHARD_COUNT);
        assert!(config.validate().is_ok());

        config.publisher.max_messages = 501;
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidFieldValue { .. })
        ));
    }

    #[test]
    fn empty_topic_is_rejected() {
        let config: RelayConfig = serde_json::from_str(r#"{ "topic": " " }"#).unwrap();
        assert_eq!(config.validate(), Err(ValidationError::EmptyTopic));
    }
}
