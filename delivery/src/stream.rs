//! Rendezvous output stream connecting the delivery handler to consumers.
//!
//! An offer is only delivered once a consumer claims it. Offers whose handler stopped waiting
//! before the claim are discarded on the consumer side, so every message a consumer returns has
//! a handler waiting for its decision.

use std::sync::Arc;

use futures::Stream;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::message::Message;

/// A message waiting to be claimed by a consumer.
#[derive(Debug)]
struct Offer {
    message: Message,
    claim: oneshot::Sender<()>,
}

/// Result of offering a message on the output stream.
#[derive(Debug)]
pub(crate) enum OfferOutcome {
    /// A consumer took the message.
    Claimed,
    /// The cancellation token fired before any consumer took the message.
    Cancelled,
    /// The offer was dropped unclaimed and may be offered again.
    Unclaimed,
    /// No consumer can ever receive from the stream again.
    Disconnected,
}

/// Creates a connected sink and stream pair.
pub(crate) fn channel() -> (OutputSink, MessageStream) {
    let (tx, rx) = mpsc::channel(1);
    let closed = CancellationToken::new();

    let sink = OutputSink {
        tx,
        closed: closed.clone(),
    };
    let stream = MessageStream {
        rx: Arc::new(Mutex::new(rx)),
        closed,
    };

    (sink, stream)
}

/// Producing side of the output stream, owned by the subscription.
#[derive(Debug, Clone)]
pub(crate) struct OutputSink {
    tx: mpsc::Sender<Offer>,
    closed: CancellationToken,
}

impl OutputSink {
    /// Offers `message` and waits until a consumer claims it or `cancel` fires.
    pub(crate) async fn offer(&self, message: Message, cancel: &CancellationToken) -> OfferOutcome {
        let (claim_tx, claim_rx) = oneshot::channel();
        let offer = Offer {
            message,
            claim: claim_tx,
        };

        tokio::select! {
            biased;

            _ = cancel.cancelled() => return OfferOutcome::Cancelled,
            result = self.tx.send(offer) => {
                if result.is_err() {
                    return OfferOutcome::Disconnected;
                }
            }
        }

        tokio::select! {
            biased;

            claim = claim_rx => match claim {
                Ok(()) => OfferOutcome::Claimed,
                Err(_) => OfferOutcome::Unclaimed,
            },
            _ = cancel.cancelled() => OfferOutcome::Cancelled,
        }
    }

    /// Signals end-of-stream to every consumer. Calling it more than once has no effect.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }
}

/// Consumer side of a subscription.
///
/// Clones share the same underlying stream; each message is received by exactly one clone.
#[derive(Debug, Clone)]
pub struct MessageStream {
    rx: Arc<Mutex<mpsc::Receiver<Offer>>>,
    closed: CancellationToken,
}

impl MessageStream {
    /// Receives the next message, or `None` once the stream is closed.
    pub async fn recv(&self) -> Option<Message> {
        loop {
            let mut rx = tokio::select! {
                biased;

                _ = self.closed.cancelled() => return None,
                rx = self.rx.lock() => rx,
            };

            let offer = tokio::select! {
                biased;

                _ = self.closed.cancelled() => return None,
                offer = rx.recv() => offer?,
            };
            drop(rx);

            if offer.claim.send(()).is_ok() {
                return Some(offer.message);
            }
        }
    }

    /// Returns `true` once the subscription closed the stream.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Converts this handle into a [`Stream`] of messages.
    pub fn into_stream(self) -> impl Stream<Item = Message> + Send + 'static {
        futures::stream::unfold(self, |stream| async move {
            let message = stream.recv().await?;
            Some((message, stream))
        })
    }
}
