use std::sync::Arc;

use delivery_config::shared::ConsumerConfig;

use crate::codec::{JsonUnmarshaller, Unmarshaller};
use crate::error::DeliveryResult;
use crate::memory::producer::MemoryProducerFactory;
use crate::memory::stream::MemoryStream;
use crate::observer::{DeliveryObserver, TracingObserver};
use crate::store::CheckpointStore;
use crate::subscriber::Subscriber;

/// Builds a [`Subscriber`] reading from a [`MemoryStream`].
///
/// Defaults to [`JsonUnmarshaller`], [`TracingObserver`] and [`ConsumerConfig::default`].
#[derive(Debug)]
pub struct MemorySubscriberBuilder<S> {
    stream: MemoryStream,
    store: S,
    unmarshaller: Arc<dyn Unmarshaller>,
    observer: Arc<dyn DeliveryObserver>,
    config: ConsumerConfig,
}

impl<S> MemorySubscriberBuilder<S>
where
    S: CheckpointStore,
{
    pub fn new(stream: MemoryStream, store: S) -> Self {
        Self {
            stream,
            store,
            unmarshaller: Arc::new(JsonUnmarshaller),
            observer: Arc::new(TracingObserver),
            config: ConsumerConfig::default(),
        }
    }

    pub fn with_unmarshaller(mut self, unmarshaller: Arc<dyn Unmarshaller>) -> Self {
        self.unmarshaller = unmarshaller;
        self
    }

    /// Sets the observer shared by the subscriber, its producers and their lanes.
    pub fn with_observer(mut self, observer: Arc<dyn DeliveryObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_config(mut self, config: ConsumerConfig) -> Self {
        self.config = config;
        self
    }

    /// Validates the configuration and builds the subscriber.
    pub fn build(self) -> DeliveryResult<Subscriber<MemoryProducerFactory<S>>> {
        self.config.validate()?;

        let factory = MemoryProducerFactory::new(
            self.stream,
            self.store,
            self.unmarshaller,
            self.observer.clone(),
            self.config,
        );

        Ok(Subscriber::with_observer(factory, self.observer))
    }
}
