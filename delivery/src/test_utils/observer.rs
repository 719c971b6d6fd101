use tokio::sync::watch;
use tokio::time::timeout;

use crate::error::DeliveryError;
use crate::observer::DeliveryObserver;
use crate::test_utils::DEFAULT_WAIT_TIMEOUT;
use crate::types::{Checkpoint, SequenceNumber};

/// Every event reported to a [`RecordingObserver`], in arrival order per kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedEvents {
    pub subscribed: Vec<String>,
    pub subscribe_failures: Vec<String>,
    pub closed: Vec<String>,
    pub redeliveries: Vec<String>,
    pub decode_failures: Vec<(String, SequenceNumber)>,
    pub checkpoints: Vec<(String, Checkpoint)>,
    pub checkpoint_failures: Vec<(String, Checkpoint)>,
    pub lane_failures: Vec<(String, String)>,
}

impl ObservedEvents {
    /// Returns the checkpoints written for `shard_id`, oldest first.
    pub fn checkpoints_for(&self, shard_id: &str) -> Vec<Checkpoint> {
        self.checkpoints
            .iter()
            .filter(|(shard, _)| shard == shard_id)
            .map(|(_, checkpoint)| *checkpoint)
            .collect()
    }
}

/// Observer that keeps every event for later assertions.
#[derive(Debug)]
pub struct RecordingObserver {
    events: watch::Sender<ObservedEvents>,
}

impl RecordingObserver {
    pub fn snapshot(&self) -> ObservedEvents {
        self.events.borrow().clone()
    }

    pub fn redeliveries(&self) -> usize {
        self.events.borrow().redeliveries.len()
    }

    /// Waits until `condition` holds for the recorded events.
    ///
    /// # Panics
    ///
    /// Panics if the condition does not hold within [`DEFAULT_WAIT_TIMEOUT`].
    pub async fn wait_for(&self, condition: impl FnMut(&ObservedEvents) -> bool) {
        let mut events = self.events.subscribe();
        match timeout(DEFAULT_WAIT_TIMEOUT, events.wait_for(condition)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => panic!("observer dropped while waiting for events"),
            Err(_) => panic!(
                "observed events did not reach the expected state within {DEFAULT_WAIT_TIMEOUT:?}: {:?}",
                self.snapshot()
            ),
        }
    }

    fn record(&self, update: impl FnOnce(&mut ObservedEvents)) {
        self.events.send_modify(update);
    }
}

impl Default for RecordingObserver {
    fn default() -> Self {
        let (events, _) = watch::channel(ObservedEvents::default());
        Self { events }
    }
}

impl DeliveryObserver for RecordingObserver {
    fn on_subscribed(&self, topic: &str) {
        self.record(|events| events.subscribed.push(topic.to_owned()));
    }

    fn on_subscribe_failed(&self, topic: &str, _error: &DeliveryError) {
        self.record(|events| events.subscribe_failures.push(topic.to_owned()));
    }

    fn on_subscription_closed(&self, topic: &str) {
        self.record(|events| events.closed.push(topic.to_owned()));
    }

    fn on_redelivery(&self, _topic: &str, message_uuid: &str) {
        self.record(|events| events.redeliveries.push(message_uuid.to_owned()));
    }

    fn on_decode_failed(&self, shard_id: &str, sequence_number: SequenceNumber, _error: &DeliveryError) {
        self.record(|events| {
            events
                .decode_failures
                .push((shard_id.to_owned(), sequence_number))
        });
    }

    fn on_checkpoint(&self, shard_id: &str, checkpoint: &Checkpoint) {
        self.record(|events| events.checkpoints.push((shard_id.to_owned(), *checkpoint)));
    }

    fn on_checkpoint_failed(&self, shard_id: &str, checkpoint: &Checkpoint, _error: &DeliveryError) {
        self.record(|events| {
            events
                .checkpoint_failures
                .push((shard_id.to_owned(), *checkpoint))
        });
    }

    fn on_lane_failed(&self, topic: &str, shard_id: &str, _error: &DeliveryError) {
        self.record(|events| {
            events
                .lane_failures
                .push((topic.to_owned(), shard_id.to_owned()))
        });
    }
}
