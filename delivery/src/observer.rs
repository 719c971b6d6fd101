//! Delivery observability hooks.
//!
//! Every component that reports events receives an `Arc<dyn DeliveryObserver>` at construction.
//! All hooks default to no-ops so implementations only override what they care about.

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::error::DeliveryError;
use crate::types::{Checkpoint, SequenceNumber};

pub trait DeliveryObserver: fmt::Debug + Send + Sync {
    /// A subscription started its producer.
    fn on_subscribed(&self, _topic: &str) {}

    /// A subscription failed to start its producer.
    fn on_subscribe_failed(&self, _topic: &str, _error: &DeliveryError) {}

    /// A subscription stopped its producer and closed its stream.
    fn on_subscription_closed(&self, _topic: &str) {}

    /// A rejected message is about to be offered again.
    fn on_redelivery(&self, _topic: &str, _message_uuid: &str) {}

    /// A record could not be decoded and was skipped.
    fn on_decode_failed(
        &self,
        _shard_id: &str,
        _sequence_number: SequenceNumber,
        _error: &DeliveryError,
    ) {
    }

    /// Progress of a lane was recorded.
    fn on_checkpoint(&self, _shard_id: &str, _checkpoint: &Checkpoint) {}

    /// Recording progress of a lane failed. The lane keeps running.
    fn on_checkpoint_failed(&self, _shard_id: &str, _checkpoint: &Checkpoint, _error: &DeliveryError) {
    }

    /// A lane stopped early because it could not read its shard or its progress. The rest of
    /// the subscription keeps running.
    fn on_lane_failed(&self, _topic: &str, _shard_id: &str, _error: &DeliveryError) {}
}

/// Observer that forwards every event to [`tracing`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl DeliveryObserver for TracingObserver {
    fn on_subscribed(&self, topic: &str) {
        info!(topic, "subscription started");
    }

    fn on_subscribe_failed(&self, topic: &str, error: &DeliveryError) {
        error!(topic, %error, "subscription failed to start");
    }

    fn on_subscription_closed(&self, topic: &str) {
        info!(topic, "subscription closed");
    }

    fn on_redelivery(&self, topic: &str, message_uuid: &str) {
        debug!(topic, message_uuid, "message rejected, redelivering");
    }

    fn on_decode_failed(&self, shard_id: &str, sequence_number: SequenceNumber, error: &DeliveryError) {
        warn!(shard_id, %sequence_number, %error, "skipping record that could not be decoded");
    }

    fn on_checkpoint(&self, shard_id: &str, checkpoint: &Checkpoint) {
        debug!(shard_id, %checkpoint, "checkpoint written");
    }

    fn on_checkpoint_failed(&self, shard_id: &str, checkpoint: &Checkpoint, error: &DeliveryError) {
        error!(shard_id, %checkpoint, %error, "failed to write checkpoint");
    }

    fn on_lane_failed(&self, topic: &str, shard_id: &str, error: &DeliveryError) {
        error!(topic, shard_id, %error, "lane stopped after an error");
    }
}
