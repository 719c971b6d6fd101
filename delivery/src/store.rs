//! Durable lane progress.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::error::{DeliveryResult, ErrorKind};
use crate::types::{Checkpoint, SequenceNumber};

/// Trait for storing and retrieving the progress of every lane of every topic.
///
/// Implementations should ensure thread-safety, since all lanes of a producer share one store.
pub trait CheckpointStore: Clone + Send + Sync + 'static {
    /// Returns the last stored checkpoint of `shard_id` in `topic`, if any.
    fn get_checkpoint(
        &self,
        topic: &str,
        shard_id: &str,
    ) -> impl Future<Output = DeliveryResult<Option<Checkpoint>>> + Send;

    /// Stores `checkpoint` as the progress of `shard_id` in `topic`.
    ///
    /// [`Checkpoint::ShardEnd`] is terminal: once stored, no sequence checkpoint may follow.
    fn store_checkpoint(
        &self,
        topic: &str,
        shard_id: &str,
        checkpoint: Checkpoint,
    ) -> impl Future<Output = DeliveryResult<()>> + Send;
}

/// Records the progress of a single lane.
pub trait Checkpointer: Send + Sync {
    /// Records that every record up to `sequence_number` was delivered.
    ///
    /// `None` records that the lane's shard ended and was fully delivered.
    fn checkpoint(
        &self,
        sequence_number: Option<SequenceNumber>,
    ) -> impl Future<Output = DeliveryResult<()>> + Send;
}

/// [`Checkpointer`] writing to a [`CheckpointStore`] on behalf of one shard.
#[derive(Debug, Clone)]
pub struct ShardCheckpointer<S> {
    store: S,
    topic: String,
    shard_id: String,
}

impl<S> ShardCheckpointer<S> {
    pub fn new(store: S, topic: impl Into<String>, shard_id: impl Into<String>) -> Self {
        Self {
            store,
            topic: topic.into(),
            shard_id: shard_id.into(),
        }
    }
}

impl<S> Checkpointer for ShardCheckpointer<S>
where
    S: CheckpointStore,
{
    async fn checkpoint(&self, sequence_number: Option<SequenceNumber>) -> DeliveryResult<()> {
        let checkpoint = match sequence_number {
            Some(sequence_number) => Checkpoint::Sequence(sequence_number),
            None => Checkpoint::ShardEnd,
        };

        self.store
            .store_checkpoint(&self.topic, &self.shard_id, checkpoint)
            .await
    }
}

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<(String, String), Checkpoint>,
}

/// In-memory checkpoint store for tests and development.
///
/// All progress is lost when the process terminates.
#[derive(Debug, Clone, Default)]
pub struct MemoryCheckpointStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every stored checkpoint keyed by `(topic, shard_id)`.
    pub async fn checkpoints(&self) -> HashMap<(String, String), Checkpoint> {
        let inner = self.inner.lock().await;
        inner.checkpoints.clone()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn get_checkpoint(&self, topic: &str, shard_id: &str) -> DeliveryResult<Option<Checkpoint>> {
        let inner = self.inner.lock().await;
        let key = (topic.to_owned(), shard_id.to_owned());

        Ok(inner.checkpoints.get(&key).copied())
    }

    async fn store_checkpoint(
        &self,
        topic: &str,
        shard_id: &str,
        checkpoint: Checkpoint,
    ) -> DeliveryResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (topic.to_owned(), shard_id.to_owned());

        if let (Some(Checkpoint::ShardEnd), Checkpoint::Sequence(_)) =
            (inner.checkpoints.get(&key), checkpoint)
        {
            bail!(
                ErrorKind::CheckpointFailed,
                "Cannot checkpoint a sequence number after the shard end",
                format!("topic {topic}, shard {shard_id}")
            );
        }

        debug!(topic, shard_id, %checkpoint, "storing checkpoint");
        inner.checkpoints.insert(key, checkpoint);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_checkpoints_per_topic_and_shard() {
        let store = MemoryCheckpointStore::new();
        let first = ShardCheckpointer::new(store.clone(), "topic", "shard-0");
        let other_topic = ShardCheckpointer::new(store.clone(), "other", "shard-0");

        first.checkpoint(Some(SequenceNumber(3))).await.unwrap();
        first.checkpoint(Some(SequenceNumber(5))).await.unwrap();
        other_topic.checkpoint(Some(SequenceNumber(1))).await.unwrap();

        assert_eq!(
            store.get_checkpoint("topic", "shard-0").await.unwrap(),
            Some(Checkpoint::Sequence(SequenceNumber(5)))
        );
        assert_eq!(
            store.get_checkpoint("other", "shard-0").await.unwrap(),
            Some(Checkpoint::Sequence(SequenceNumber(1)))
        );
        assert_eq!(store.get_checkpoint("topic", "shard-1").await.unwrap(), None);
        assert_eq!(store.checkpoints().await.len(), 2);
    }

    #[tokio::test]
    async fn shard_end_is_terminal() {
        let store = MemoryCheckpointStore::new();
        let checkpointer = ShardCheckpointer::new(store.clone(), "topic", "shard-0");

        checkpointer.checkpoint(None).await.unwrap();
        checkpointer.checkpoint(None).await.unwrap();

        let err = checkpointer
            .checkpoint(Some(SequenceNumber(9)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CheckpointFailed);
        assert_eq!(
            store.get_checkpoint("topic", "shard-0").await.unwrap(),
            Some(Checkpoint::ShardEnd)
        );
    }
}
