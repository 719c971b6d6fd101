//! In-memory stream backend.
//!
//! [`MemoryStream`] stands in for a sharded record stream. [`MemoryPublisher`] appends to it and
//! [`MemorySubscriberBuilder`] builds a [`crate::subscriber::Subscriber`] whose producers run one
//! lane per shard, checkpointing progress into a [`crate::store::CheckpointStore`].

mod builder;
mod producer;
mod publisher;
mod stream;

pub use builder::MemorySubscriberBuilder;
pub use producer::{MemoryProducer, MemoryProducerFactory};
pub use publisher::MemoryPublisher;
pub use stream::{MemoryStream, PutRecordResult, ShardBatch};
