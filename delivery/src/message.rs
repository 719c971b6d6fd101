use std::collections::HashMap;
use std::fmt;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Consumer decision on a delivered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Ack,
    Nack,
}

/// A unit of delivery handed to stream consumers.
///
/// A message carries at most one decision slot. [`Message::ack`] and [`Message::nack`] consume
/// the message, so each delivery attempt is decided at most once. Dropping a delivered message
/// without deciding counts as a rejection.
pub struct Message {
    uuid: String,
    payload: Bytes,
    metadata: HashMap<String, String>,
    context: Option<CancellationToken>,
    decision: Option<oneshot::Sender<Decision>>,
}

impl Message {
    pub fn new(uuid: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            uuid: uuid.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
            context: None,
            decision: None,
        }
    }

    /// Creates a message identified by a random v4 UUID.
    pub fn with_random_uuid(payload: impl Into<Bytes>) -> Self {
        Self::new(Uuid::new_v4().to_string(), payload)
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn metadata(&self) -> &HashMap<String, String> {
        &self.metadata
    }

    /// Returns the metadata value for `key`, if present.
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Replaces the whole metadata map.
    pub fn with_metadata(mut self, metadata: HashMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Returns the cancellation token of the subscription this message was delivered through.
    pub fn context(&self) -> Option<&CancellationToken> {
        self.context.as_ref()
    }

    pub fn set_context(&mut self, context: CancellationToken) {
        self.context = Some(context);
    }

    /// Accepts the message.
    ///
    /// Returns `false` if the message has no live decision slot, either because it was never
    /// delivered or because the delivery was abandoned.
    pub fn ack(mut self) -> bool {
        self.decide(Decision::Ack)
    }

    /// Rejects the message, causing a copy of it to be redelivered.
    ///
    /// Returns `false` under the same conditions as [`Message::ack`].
    pub fn nack(mut self) -> bool {
        self.decide(Decision::Nack)
    }

    /// Returns `true` while a decision can still be recorded.
    pub fn is_pending(&self) -> bool {
        self.decision
            .as_ref()
            .is_some_and(|decision| !decision.is_closed())
    }

    /// Returns a message with the same identity, payload, metadata and context, and no
    /// decision slot.
    pub fn copy(&self) -> Message {
        Message {
            uuid: self.uuid.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
            context: self.context.clone(),
            decision: None,
        }
    }

    /// Installs a fresh decision slot and returns its receiving end.
    pub(crate) fn attach_decision(&mut self) -> oneshot::Receiver<Decision> {
        let (tx, rx) = oneshot::channel();
        self.decision = Some(tx);

        rx
    }

    fn decide(&mut self, decision: Decision) -> bool {
        match self.decision.take() {
            Some(slot) => slot.send(decision).is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("uuid", &self.uuid)
            .field("payload_len", &self.payload.len())
            .field("metadata", &self.metadata)
            .field("pending", &self.is_pending())
            .finish()
    }
}
