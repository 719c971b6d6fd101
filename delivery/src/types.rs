//! Core record and progress types shared by lanes, stores and codecs.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metadata key holding the partition key a message was published with.
pub const PARTITION_KEY_KEY: &str = "partitionKey";

/// Metadata key holding the id of the shard a message was read from.
pub const SHARD_ID_KEY: &str = "shardID";

/// Metadata key holding the RFC 3339 time at which the record reached the stream.
pub const APPROXIMATE_ARRIVAL_TIMESTAMP_KEY: &str = "approximateArrivalTimestamp";

/// Position of a record within its shard.
///
/// Sequence numbers increase monotonically within a shard and are never reused.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SequenceNumber(pub u64);

impl fmt::Display for SequenceNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:020}", self.0)
    }
}

/// A raw record as read from one shard of an upstream stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub sequence_number: SequenceNumber,
    pub partition_key: String,
    pub data: Bytes,
    pub approximate_arrival_timestamp: DateTime<Utc>,
}

/// An encoded entry ready to be appended to a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRecordEntry {
    pub partition_key: String,
    pub data: Bytes,
}

/// Durable progress of a lane over its shard.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Checkpoint {
    /// Every record up to and including this sequence number was delivered.
    Sequence(SequenceNumber),
    /// The shard was closed and fully delivered; it never needs to be read again.
    ShardEnd,
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Checkpoint::Sequence(sequence_number) => write!(f, "{sequence_number}"),
            Checkpoint::ShardEnd => f.write_str("SHARD_END"),
        }
    }
}

/// Formats the id of the shard at `index`, e.g. `shardId-000000000003`.
pub fn shard_id(index: usize) -> String {
    format!("shardId-{index:012}")
}
