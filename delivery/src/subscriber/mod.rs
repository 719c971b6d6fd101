//! Subscriptions turning producer lanes into an acknowledgment-gated message stream.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::concurrency::closer::Closer;
use crate::error::DeliveryResult;
use crate::observer::{DeliveryObserver, TracingObserver};
use crate::stream::{self, MessageStream};

pub mod handler;
pub mod producer;

pub use handler::{HandleResult, MessageHandler};
pub use producer::{Producer, ProducerFactory};

/// Opens subscriptions and shuts all of them down together.
///
/// Each subscription runs one [`Producer`] whose lanes deliver through a [`MessageHandler`]
/// into the returned [`MessageStream`]. A message is handed to exactly one consumer and the
/// producing lane waits until that consumer acks it; nacked messages are delivered again.
#[derive(Debug)]
pub struct Subscriber<F> {
    factory: Arc<F>,
    closer: Closer,
    observer: Arc<dyn DeliveryObserver>,
}

impl<F> Subscriber<F>
where
    F: ProducerFactory,
{
    /// Creates a subscriber that reports events through [`TracingObserver`].
    pub fn new(factory: F) -> Self {
        Self::with_observer(factory, Arc::new(TracingObserver))
    }

    pub fn with_observer(factory: F, observer: Arc<dyn DeliveryObserver>) -> Self {
        Self {
            factory: Arc::new(factory),
            closer: Closer::new(),
            observer,
        }
    }

    /// Opens a subscription to `topic` that lives until `parent` is cancelled or
    /// [`Subscriber::close`] is called.
    ///
    /// If the subscriber is already closing or `parent` is already cancelled, an empty closed
    /// stream is returned. If the producer fails to start its error is returned and nothing is
    /// left running.
    pub fn subscribe(
        &self,
        parent: &CancellationToken,
        topic: &str,
    ) -> DeliveryResult<MessageStream> {
        let scope = self.closer.start(parent);
        let (sink, stream) = stream::channel();

        if scope.is_cancelled() {
            debug!(topic, "subscription cancelled before start, returning closed stream");
            sink.close();
            scope.done();

            return Ok(stream);
        }

        let handler = MessageHandler::new(
            topic,
            scope.token().clone(),
            sink.clone(),
            self.observer.clone(),
        );
        let mut producer = self.factory.create(handler, topic);

        if let Err(err) = producer.start() {
            sink.close();
            scope.done();
            self.observer.on_subscribe_failed(topic, &err);

            return Err(err);
        }

        self.observer.on_subscribed(topic);

        let topic = topic.to_owned();
        let observer = self.observer.clone();
        tokio::spawn(async move {
            scope.cancelled().await;
            info!(%topic, "subscription cancelled, shutting down producer");

            if let Err(err) = producer.shutdown().await {
                error!(%topic, error = %err, "producer shutdown failed");
            }

            sink.close();
            observer.on_subscription_closed(&topic);
            scope.done();
        });

        Ok(stream)
    }

    /// Cancels every subscription and waits until all producers stopped and streams closed.
    ///
    /// Subsequent calls only wait for the same shutdown to complete.
    pub async fn close(&self) -> DeliveryResult<()> {
        self.closer.close().await
    }

    /// Returns `true` once [`Subscriber::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closer.is_closing()
    }
}

impl<F> Clone for Subscriber<F> {
    fn clone(&self) -> Self {
        Self {
            factory: self.factory.clone(),
            closer: self.closer.clone(),
            observer: self.observer.clone(),
        }
    }
}
