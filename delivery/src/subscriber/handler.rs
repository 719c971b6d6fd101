use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::{Decision, Message};
use crate::observer::DeliveryObserver;
use crate::stream::{OfferOutcome, OutputSink};

/// Tells the calling lane whether to keep delivering the current batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleResult {
    /// The message was accepted; continue with the next one.
    Continue,
    /// The subscription is shutting down. Abandon the batch without recording progress, so that
    /// its records are delivered again after a restart.
    Stop,
}

impl HandleResult {
    pub fn is_stop(&self) -> bool {
        matches!(self, HandleResult::Stop)
    }
}

/// States of one logical message travelling through the delivery loop.
///
/// The message held by `Offering` and `AwaitingDecision` carries no decision slot; each attempt
/// offers a fresh copy of it.
#[derive(Debug)]
enum DeliveryState {
    Offering(Message),
    AwaitingDecision {
        message: Message,
        decision: oneshot::Receiver<Decision>,
    },
    Rejected(Message),
    Accepted,
    Cancelled { delivered: bool },
}

#[derive(Debug)]
struct HandlerInner {
    topic: String,
    scope: CancellationToken,
    sink: OutputSink,
    observer: Arc<dyn DeliveryObserver>,
}

/// Callback through which producer lanes deliver messages to the subscription's stream.
///
/// Cloning is cheap; every clone delivers to the same stream under the same scope.
#[derive(Debug, Clone)]
pub struct MessageHandler {
    inner: Arc<HandlerInner>,
}

impl MessageHandler {
    pub(crate) fn new(
        topic: impl Into<String>,
        scope: CancellationToken,
        sink: OutputSink,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        Self {
            inner: Arc::new(HandlerInner {
                topic: topic.into(),
                scope,
                sink,
                observer,
            }),
        }
    }

    /// Returns the topic of the subscription this handler delivers to.
    pub fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Returns `true` once the subscription's scope is cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.inner.scope.is_cancelled()
    }

    /// Delivers `message` until a consumer accepts it or the subscription is cancelled.
    ///
    /// Rejected attempts are offered again without limit.
    pub async fn handle(&self, mut message: Message) -> HandleResult {
        message.set_context(self.inner.scope.clone());

        let mut state = DeliveryState::Offering(message);
        loop {
            state = match state {
                DeliveryState::Offering(message) => self.offer(message).await,
                DeliveryState::AwaitingDecision { message, decision } => {
                    self.await_decision(message, decision).await
                }
                DeliveryState::Rejected(message) => {
                    self.inner
                        .observer
                        .on_redelivery(&self.inner.topic, message.uuid());

                    DeliveryState::Offering(message.copy())
                }
                DeliveryState::Accepted => return HandleResult::Continue,
                DeliveryState::Cancelled { delivered } => {
                    debug!(
                        topic = %self.inner.topic,
                        delivered,
                        "delivery interrupted by cancellation"
                    );

                    return HandleResult::Stop;
                }
            };
        }
    }

    async fn offer(&self, message: Message) -> DeliveryState {
        let mut attempt = message.copy();
        let decision = attempt.attach_decision();

        match self.inner.sink.offer(attempt, &self.inner.scope).await {
            OfferOutcome::Claimed => DeliveryState::AwaitingDecision { message, decision },
            OfferOutcome::Cancelled => DeliveryState::Cancelled { delivered: false },
            OfferOutcome::Unclaimed => DeliveryState::Offering(message),
            OfferOutcome::Disconnected => {
                // Nobody can consume anymore, hold the lane until the subscription goes away.
                self.inner.scope.cancelled().await;

                DeliveryState::Cancelled { delivered: false }
            }
        }
    }

    async fn await_decision(
        &self,
        message: Message,
        decision: oneshot::Receiver<Decision>,
    ) -> DeliveryState {
        tokio::select! {
            biased;

            decision = decision => match decision {
                Ok(Decision::Ack) => DeliveryState::Accepted,
                // A consumer dropping the message without deciding rejects it.
                Ok(Decision::Nack) | Err(_) => DeliveryState::Rejected(message),
            },
            _ = self.inner.scope.cancelled() => DeliveryState::Cancelled { delivered: true },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::stream::{self, MessageStream};
    use crate::test_utils::observer::RecordingObserver;

    fn handler() -> (MessageHandler, MessageStream, CancellationToken, Arc<RecordingObserver>) {
        let (sink, stream) = stream::channel();
        let scope = CancellationToken::new();
        let observer = Arc::new(RecordingObserver::default());
        let handler = MessageHandler::new("topic", scope.clone(), sink, observer.clone());

        (handler, stream, scope, observer)
    }

    #[tokio::test]
    async fn accepted_message_continues() {
        let (handler, stream, _scope, _) = handler();

        let consumer = tokio::spawn(async move {
            let message = stream.recv().await.unwrap();
            assert!(message.context().is_some());
            assert!(message.ack());
        });

        let result = timeout(Duration::from_secs(1), handler.handle(Message::new("id", "a")))
            .await
            .unwrap();

        assert_eq!(result, HandleResult::Continue);
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_message_is_redelivered_with_same_identity() {
        let (handler, stream, _scope, observer) = handler();

        let consumer = tokio::spawn(async move {
            let mut uuids = Vec::new();
            for _ in 0..2 {
                let message = stream.recv().await.unwrap();
                uuids.push((message.uuid().to_owned(), message.payload().clone()));
                assert!(message.nack());
            }

            // Dropping without a decision also rejects.
            drop(stream.recv().await.unwrap());

            let message = stream.recv().await.unwrap();
            uuids.push((message.uuid().to_owned(), message.payload().clone()));
            assert!(message.ack());

            uuids
        });

        let result = timeout(Duration::from_secs(1), handler.handle(Message::new("id", "a")))
            .await
            .unwrap();
        assert_eq!(result, HandleResult::Continue);

        let attempts = consumer.await.unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|(uuid, payload)| uuid == "id" && payload == "a"));
        assert_eq!(observer.redeliveries(), 3);
    }

    #[tokio::test]
    async fn cancellation_while_offering_stops_without_delivery() {
        let (handler, stream, scope, _) = handler();

        let handle = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(Message::new("id", "a")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        scope.cancel();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(result, HandleResult::Stop);

        // The abandoned offer is discarded on the consumer side.
        let received = timeout(Duration::from_millis(50), stream.recv()).await;
        assert!(received.is_err());
    }

    #[tokio::test]
    async fn cancellation_while_awaiting_decision_stops() {
        let (handler, stream, scope, _) = handler();

        let handle = tokio::spawn({
            let handler = handler.clone();
            async move { handler.handle(Message::new("id", "a")).await }
        });

        let message = stream.recv().await.unwrap();
        scope.cancel();

        let result = timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        assert_eq!(result, HandleResult::Stop);
        assert!(!message.ack());
    }

    #[tokio::test]
    async fn handle_on_cancelled_scope_stops_immediately() {
        let (handler, _stream, scope, _) = handler();
        scope.cancel();

        assert!(handler.is_cancelled());
        let result = handler.handle(Message::new("id", "a")).await;
        assert!(result.is_stop());
    }
}
