use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Configuration for publishers writing messages into a stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PublisherConfig {
    /// Maximum number of messages accepted by a single publish call.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
}

impl PublisherConfig {
    /// Default maximum number of messages per publish call.
    pub const DEFAULT_MAX_MESSAGES: usize = 500;

    /// Validates publisher configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_messages == 0 || self.max_messages > Self::DEFAULT_MAX_MESSAGES {
            return Err(ValidationError::InvalidFieldValue {
                field: "publisher.max_messages".to_string(),
                constraint: format!("must be between 1 and {}", Self::DEFAULT_MAX_MESSAGES),
            });
        }

        Ok(())
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
        }
    }
}

fn default_max_messages() -> usize {
    PublisherConfig::DEFAULT_MAX_MESSAGES
}
