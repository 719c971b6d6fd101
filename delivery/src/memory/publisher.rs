use std::sync::Arc;

use delivery_config::shared::PublisherConfig;
use tracing::debug;

use crate::bail;
use crate::codec::{JsonMarshaller, Marshaller};
use crate::error::{DeliveryResult, ErrorKind};
use crate::memory::stream::MemoryStream;
use crate::message::Message;
use crate::publisher::Publisher;

/// Publisher appending marshalled messages to a [`MemoryStream`].
#[derive(Debug, Clone)]
pub struct MemoryPublisher {
    stream: MemoryStream,
    marshaller: Arc<dyn Marshaller>,
    config: PublisherConfig,
}

impl MemoryPublisher {
    /// Creates a publisher using [`JsonMarshaller`] and the default configuration.
    pub fn new(stream: MemoryStream) -> Self {
        Self {
            stream,
            marshaller: Arc::new(JsonMarshaller),
            config: PublisherConfig::default(),
        }
    }

    pub fn with_marshaller(mut self, marshaller: Arc<dyn Marshaller>) -> Self {
        self.marshaller = marshaller;
        self
    }

    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.config = config;
        self
    }
}

impl Publisher for MemoryPublisher {
    async fn publish(&self, topic: &str, messages: Vec<Message>) -> DeliveryResult<()> {
        if messages.len() > self.config.max_messages {
            bail!(
                ErrorKind::PublishLimitExceeded,
                "Too many messages in one publish call",
                format!(
                    "{} messages, at most {} allowed",
                    messages.len(),
                    self.config.max_messages
                )
            );
        }

        let entries = messages
            .iter()
            .map(|message| self.marshaller.marshal(message))
            .collect::<DeliveryResult<Vec<_>>>()?;

        let results = self.stream.put_records(topic, entries)?;
        debug!(topic, count = results.len(), "published messages");

        Ok(())
    }
}
