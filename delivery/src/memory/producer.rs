use std::sync::Arc;

use delivery_config::shared::ConsumerConfig;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::codec::Unmarshaller;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{DeliveryError, DeliveryResult, ErrorKind};
use crate::memory::stream::MemoryStream;
use crate::observer::DeliveryObserver;
use crate::processor::{BatchOutcome, RecordProcessor, RecordProcessorFactory, ShutdownReason};
use crate::store::{CheckpointStore, ShardCheckpointer};
use crate::subscriber::{MessageHandler, Producer, ProducerFactory};
use crate::types::{Checkpoint, SequenceNumber};
use crate::{bail, delivery_error};

/// Builds [`MemoryProducer`]s reading from a [`MemoryStream`].
#[derive(Debug)]
pub struct MemoryProducerFactory<S> {
    stream: MemoryStream,
    store: S,
    unmarshaller: Arc<dyn Unmarshaller>,
    observer: Arc<dyn DeliveryObserver>,
    config: ConsumerConfig,
}

impl<S> MemoryProducerFactory<S> {
    pub fn new(
        stream: MemoryStream,
        store: S,
        unmarshaller: Arc<dyn Unmarshaller>,
        observer: Arc<dyn DeliveryObserver>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            stream,
            store,
            unmarshaller,
            observer,
            config,
        }
    }
}

impl<S> ProducerFactory for MemoryProducerFactory<S>
where
    S: CheckpointStore,
{
    type Producer = MemoryProducer<S>;

    fn create(&self, handler: MessageHandler, topic: &str) -> MemoryProducer<S> {
        let processors =
            RecordProcessorFactory::new(handler, self.unmarshaller.clone(), self.observer.clone());

        MemoryProducer {
            topic: topic.to_owned(),
            stream: self.stream.clone(),
            store: self.store.clone(),
            processors: Arc::new(processors),
            observer: self.observer.clone(),
            config: self.config.clone(),
            shutdown_tx: None,
            lanes: JoinSet::new(),
        }
    }
}

/// Producer running one lane per shard of a [`MemoryStream`] topic.
///
/// Each lane resumes after its stored checkpoint, delivers batches of at most
/// [`ConsumerConfig::max_records`] records and stops when its shard ended and was fully
/// delivered, when the handler asks to stop, or when the producer shuts down.
#[derive(Debug)]
pub struct MemoryProducer<S> {
    topic: String,
    stream: MemoryStream,
    store: S,
    processors: Arc<RecordProcessorFactory>,
    observer: Arc<dyn DeliveryObserver>,
    config: ConsumerConfig,
    shutdown_tx: Option<ShutdownTx>,
    lanes: JoinSet<DeliveryResult<()>>,
}

impl<S> Producer for MemoryProducer<S>
where
    S: CheckpointStore,
{
    fn start(&mut self) -> DeliveryResult<()> {
        if self.shutdown_tx.is_some() {
            bail!(
                ErrorKind::InvalidState,
                "Producer was already started",
                format!("topic {}", self.topic)
            );
        }

        let shard_ids = self.stream.shard_ids(&self.topic).map_err(|err| {
            delivery_error!(
                ErrorKind::ProducerStartFailed,
                "Failed to list the shards of the topic",
                format!("topic {}", self.topic),
                source: err
            )
        })?;

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        for shard_id in shard_ids {
            let lane = Lane {
                topic: self.topic.clone(),
                shard_id,
                stream: self.stream.clone(),
                store: self.store.clone(),
                processor: self.processors.create_processor(),
                observer: self.observer.clone(),
                config: self.config.clone(),
            };

            self.lanes.spawn(lane.run(shutdown_rx.clone()));
        }
        self.shutdown_tx = Some(shutdown_tx);

        info!(topic = %self.topic, lanes = self.lanes.len(), "memory producer started");

        Ok(())
    }

    async fn shutdown(&mut self) -> DeliveryResult<()> {
        if let Some(shutdown_tx) = &self.shutdown_tx {
            shutdown_tx.shutdown();
        }

        let mut errors = Vec::new();
        while let Some(result) = self.lanes.join_next().await {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(topic = %self.topic, error = %err, "lane failed");
                    errors.push(err);
                }
                Err(err) => {
                    error!(topic = %self.topic, error = %err, "lane panicked");
                    errors.push(delivery_error!(
                        ErrorKind::LaneWorkerPanic,
                        "A lane task panicked or was aborted",
                        source: err
                    ));
                }
            }
        }

        info!(topic = %self.topic, "memory producer stopped");

        if !errors.is_empty() {
            return Err(DeliveryError::from(errors));
        }

        Ok(())
    }
}

/// Reads one shard and delivers its records.
#[derive(Debug)]
struct Lane<S> {
    topic: String,
    shard_id: String,
    stream: MemoryStream,
    store: S,
    processor: RecordProcessor,
    observer: Arc<dyn DeliveryObserver>,
    config: ConsumerConfig,
}

impl<S> Lane<S>
where
    S: CheckpointStore,
{
    /// Runs the lane, reporting an error that ends it to the observer right away.
    async fn run(mut self, shutdown_rx: ShutdownRx) -> DeliveryResult<()> {
        let result = self.deliver(shutdown_rx).await;
        if let Err(err) = &result {
            self.observer.on_lane_failed(&self.topic, &self.shard_id, err);
        }

        result
    }

    async fn deliver(&mut self, mut shutdown_rx: ShutdownRx) -> DeliveryResult<()> {
        let checkpoint = self
            .store
            .get_checkpoint(&self.topic, &self.shard_id)
            .await
            .map_err(|err| {
                delivery_error!(
                    ErrorKind::CheckpointLoadFailed,
                    "Failed to load the checkpoint of the shard",
                    format!("shard {}", self.shard_id),
                    source: err
                )
            })?;

        let mut position: Option<SequenceNumber> = match checkpoint {
            Some(Checkpoint::ShardEnd) => {
                debug!(shard_id = %self.shard_id, "shard already fully delivered");
                return Ok(());
            }
            Some(Checkpoint::Sequence(sequence_number)) => Some(sequence_number),
            None => None,
        };

        self.processor.initialize(&self.shard_id, checkpoint);
        let checkpointer =
            ShardCheckpointer::new(self.store.clone(), self.topic.clone(), self.shard_id.clone());

        loop {
            if shutdown_rx.is_shutdown() {
                self.processor
                    .shutdown(ShutdownReason::Requested, &checkpointer)
                    .await;
                return Ok(());
            }

            let batch = self.stream.get_records(
                &self.topic,
                &self.shard_id,
                position,
                self.config.max_records,
            )?;

            match self
                .processor
                .process_records(&batch.records, &checkpointer)
                .await
            {
                BatchOutcome::Completed { last } => {
                    position = Some(last);
                }
                BatchOutcome::Interrupted => {
                    self.processor
                        .shutdown(ShutdownReason::Requested, &checkpointer)
                        .await;
                    return Ok(());
                }
                BatchOutcome::Empty if batch.ended => {
                    self.processor
                        .shutdown(ShutdownReason::Terminate, &checkpointer)
                        .await;
                    return Ok(());
                }
                BatchOutcome::Empty => {
                    tokio::select! {
                        _ = shutdown_rx.wait() => {}
                        _ = tokio::time::sleep(self.config.idle_poll_interval()) => {}
                    }
                }
            }
        }
    }
}
