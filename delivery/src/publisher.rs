use std::future::Future;

use crate::error::DeliveryResult;
use crate::message::Message;

/// Appends messages to a topic of a stream.
pub trait Publisher {
    /// Publishes `messages` to `topic`, in order, as a single call.
    fn publish(
        &self,
        topic: &str,
        messages: Vec<Message>,
    ) -> impl Future<Output = DeliveryResult<()>> + Send;

    /// Releases the publisher's resources.
    ///
    /// The default implementation is a no-op.
    fn close(&self) -> impl Future<Output = DeliveryResult<()>> + Send {
        async { Ok(()) }
    }
}
