use std::future::Future;

use crate::error::DeliveryResult;
use crate::subscriber::handler::MessageHandler;

/// Source of messages for one subscription.
///
/// A [`Producer`] owns one or more lanes that call the [`MessageHandler`] it was created with.
/// Lanes may call the handler concurrently; each call holds its lane until the handler returns.
pub trait Producer: Send + 'static {
    /// Starts the producer's lanes.
    ///
    /// Must return quickly; the handler is called asynchronously from the started lanes. On
    /// failure nothing may keep running.
    fn start(&mut self) -> DeliveryResult<()>;

    /// Stops every lane and releases the producer's resources.
    ///
    /// The returned future resolves only once no lane will call the handler again. Errors are
    /// reported but do not prevent the subscription from closing.
    fn shutdown(&mut self) -> impl Future<Output = DeliveryResult<()>> + Send;
}

/// Builds a [`Producer`] for a subscription.
///
/// Creation is pure construction: side effects belong in [`Producer::start`].
pub trait ProducerFactory: Send + Sync + 'static {
    type Producer: Producer;

    fn create(&self, handler: MessageHandler, topic: &str) -> Self::Producer;
}

impl<F, P> ProducerFactory for F
where
    F: Fn(MessageHandler, &str) -> P + Send + Sync + 'static,
    P: Producer,
{
    type Producer = P;

    fn create(&self, handler: MessageHandler, topic: &str) -> P {
        self(handler, topic)
    }
}
