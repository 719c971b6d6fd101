//! Per-lane record processing.
//!
//! A [`RecordProcessor`] turns batches of raw records read from one shard into messages, hands
//! them to the subscription's [`MessageHandler`] and records progress once a whole batch has
//! been accepted.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::debug;

use crate::codec::Unmarshaller;
use crate::observer::DeliveryObserver;
use crate::store::Checkpointer;
use crate::subscriber::{HandleResult, MessageHandler};
use crate::types::{Checkpoint, Record, SHARD_ID_KEY, SequenceNumber};

/// Why a lane stops processing its shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// The subscription is shutting down; the shard will be read again later.
    Requested,
    /// The shard ended and every record of it was processed.
    Terminate,
}

/// Result of processing one batch of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch held no records, nothing was recorded.
    Empty,
    /// The handler asked to stop. Progress was not recorded, so the batch will be read again.
    Interrupted,
    /// Every record was handled and progress was recorded up to `last`.
    Completed { last: SequenceNumber },
}

/// Hands out [`RecordProcessor`]s sharing one handler, each with its own id.
#[derive(Debug)]
pub struct RecordProcessorFactory {
    next_id: AtomicUsize,
    handler: MessageHandler,
    unmarshaller: Arc<dyn Unmarshaller>,
    observer: Arc<dyn DeliveryObserver>,
}

impl RecordProcessorFactory {
    pub fn new(
        handler: MessageHandler,
        unmarshaller: Arc<dyn Unmarshaller>,
        observer: Arc<dyn DeliveryObserver>,
    ) -> Self {
        Self {
            next_id: AtomicUsize::new(1),
            handler,
            unmarshaller,
            observer,
        }
    }

    pub fn create_processor(&self) -> RecordProcessor {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        RecordProcessor {
            id,
            shard_id: String::new(),
            initial_checkpoint: None,
            handler: self.handler.clone(),
            unmarshaller: self.unmarshaller.clone(),
            observer: self.observer.clone(),
        }
    }
}

/// Processes the records of a single shard.
#[derive(Debug)]
pub struct RecordProcessor {
    id: usize,
    shard_id: String,
    initial_checkpoint: Option<Checkpoint>,
    handler: MessageHandler,
    unmarshaller: Arc<dyn Unmarshaller>,
    observer: Arc<dyn DeliveryObserver>,
}

impl RecordProcessor {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn shard_id(&self) -> &str {
        &self.shard_id
    }

    /// Returns the checkpoint the lane resumed from.
    pub fn initial_checkpoint(&self) -> Option<Checkpoint> {
        self.initial_checkpoint
    }

    /// Binds the processor to `shard_id`, resuming after `checkpoint`.
    pub fn initialize(&mut self, shard_id: &str, checkpoint: Option<Checkpoint>) {
        debug!(processor_id = self.id, shard_id, "initializing record processor");

        self.shard_id = shard_id.to_owned();
        self.initial_checkpoint = checkpoint;
    }

    /// Delivers every record of the batch, then checkpoints its last sequence number.
    ///
    /// Records that cannot be decoded are reported and skipped. If the handler asks to stop, the
    /// rest of the batch is abandoned and no progress is recorded. A failed checkpoint is
    /// reported and not retried; the batch still counts as completed.
    pub async fn process_records<C>(&self, records: &[Record], checkpointer: &C) -> BatchOutcome
    where
        C: Checkpointer,
    {
        let Some(last) = records.last().map(|record| record.sequence_number) else {
            return BatchOutcome::Empty;
        };

        for record in records {
            let mut message = match self.unmarshaller.unmarshal(record) {
                Ok(message) => message,
                Err(err) => {
                    self.observer
                        .on_decode_failed(&self.shard_id, record.sequence_number, &err);
                    continue;
                }
            };

            message.set_metadata(SHARD_ID_KEY, self.shard_id.clone());
            if self.handler.handle(message).await == HandleResult::Stop {
                debug!(
                    shard_id = %self.shard_id,
                    sequence_number = %record.sequence_number,
                    "batch interrupted, skipping checkpoint"
                );

                return BatchOutcome::Interrupted;
            }
        }

        self.checkpoint(checkpointer, Checkpoint::Sequence(last)).await;

        BatchOutcome::Completed { last }
    }

    /// Finishes processing of the shard.
    ///
    /// When the shard ended, [`Checkpoint::ShardEnd`] is recorded so it is never read again.
    pub async fn shutdown<C>(&self, reason: ShutdownReason, checkpointer: &C)
    where
        C: Checkpointer,
    {
        debug!(processor_id = self.id, shard_id = %self.shard_id, ?reason, "shutting down record processor");

        if reason == ShutdownReason::Terminate {
            self.checkpoint(checkpointer, Checkpoint::ShardEnd).await;
        }
    }

    async fn checkpoint<C>(&self, checkpointer: &C, checkpoint: Checkpoint)
    where
        C: Checkpointer,
    {
        let sequence_number = match checkpoint {
            Checkpoint::Sequence(sequence_number) => Some(sequence_number),
            Checkpoint::ShardEnd => None,
        };

        match checkpointer.checkpoint(sequence_number).await {
            Ok(()) => self.observer.on_checkpoint(&self.shard_id, &checkpoint),
            Err(err) => self
                .observer
                .on_checkpoint_failed(&self.shard_id, &checkpoint, &err),
        }
    }
}
