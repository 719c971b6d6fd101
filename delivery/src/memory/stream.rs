use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::Utc;
use tracing::debug;

use crate::bail;
use crate::error::{DeliveryResult, ErrorKind};
use crate::types::{PutRecordEntry, Record, SequenceNumber, shard_id};

/// Records read from one shard by [`MemoryStream::get_records`].
#[derive(Debug, Clone, PartialEq)]
pub struct ShardBatch {
    pub records: Vec<Record>,
    /// `true` when the shard ended and no record follows this batch.
    pub ended: bool,
}

/// Position assigned to a record appended by [`MemoryStream::put_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRecordResult {
    pub shard_id: String,
    pub sequence_number: SequenceNumber,
}

#[derive(Debug)]
struct Shard {
    id: String,
    records: Vec<Record>,
    ended: bool,
}

#[derive(Debug, Default)]
struct Inner {
    topics: HashMap<String, Vec<Shard>>,
}

/// In-memory sharded record stream for tests and development.
///
/// Every topic has a fixed set of shards. Records are assigned to a shard by hashing their
/// partition key, and get sequence numbers increasing by one from 1 within their shard.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `topic` with `shard_count` open shards.
    pub fn create_topic(&self, topic: &str, shard_count: usize) -> DeliveryResult<()> {
        if shard_count == 0 {
            bail!(
                ErrorKind::InvalidState,
                "A topic needs at least one shard",
                format!("topic {topic}")
            );
        }

        let mut inner = self.lock();
        if inner.topics.contains_key(topic) {
            bail!(
                ErrorKind::InvalidState,
                "Topic already exists",
                format!("topic {topic}")
            );
        }

        let shards = (0..shard_count)
            .map(|index| Shard {
                id: shard_id(index),
                records: Vec::new(),
                ended: false,
            })
            .collect();
        inner.topics.insert(topic.to_owned(), shards);

        debug!(topic, shard_count, "created topic");

        Ok(())
    }

    /// Returns the ids of every shard of `topic`, open or ended.
    pub fn shard_ids(&self, topic: &str) -> DeliveryResult<Vec<String>> {
        let inner = self.lock();
        let shards = Self::shards(&inner, topic)?;

        Ok(shards.iter().map(|shard| shard.id.clone()).collect())
    }

    /// Appends `entries` in order, each to the open shard its partition key hashes to.
    ///
    /// Fails without appending anything if every shard of the topic ended.
    pub fn put_records(
        &self,
        topic: &str,
        entries: Vec<PutRecordEntry>,
    ) -> DeliveryResult<Vec<PutRecordResult>> {
        let mut inner = self.lock();
        let shards = Self::shards_mut(&mut inner, topic)?;

        let open: Vec<usize> = shards
            .iter()
            .enumerate()
            .filter(|(_, shard)| !shard.ended)
            .map(|(index, _)| index)
            .collect();
        if open.is_empty() {
            bail!(
                ErrorKind::ShardNotFound,
                "Topic has no open shard",
                format!("topic {topic}")
            );
        }

        let mut results = Vec::with_capacity(entries.len());
        for entry in entries {
            let shard = &mut shards[open[partition(&entry.partition_key, open.len())]];
            let sequence_number = SequenceNumber(shard.records.len() as u64 + 1);

            shard.records.push(Record {
                sequence_number,
                partition_key: entry.partition_key,
                data: entry.data,
                approximate_arrival_timestamp: Utc::now(),
            });
            results.push(PutRecordResult {
                shard_id: shard.id.clone(),
                sequence_number,
            });
        }

        Ok(results)
    }

    /// Appends a single record with the given partition key.
    pub fn put_record(
        &self,
        topic: &str,
        partition_key: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> DeliveryResult<PutRecordResult> {
        let entry = PutRecordEntry {
            partition_key: partition_key.into(),
            data: data.into(),
        };

        let mut results = self.put_records(topic, vec![entry])?;
        match results.pop() {
            Some(result) => Ok(result),
            None => bail!(ErrorKind::InvalidState, "No record was appended"),
        }
    }

    /// Returns up to `limit` records of a shard following `after`, or from its start.
    pub fn get_records(
        &self,
        topic: &str,
        shard_id: &str,
        after: Option<SequenceNumber>,
        limit: usize,
    ) -> DeliveryResult<ShardBatch> {
        let inner = self.lock();
        let shard = Self::shard(&inner, topic, shard_id)?;

        let start = match after {
            Some(after) => shard
                .records
                .partition_point(|record| record.sequence_number <= after),
            None => 0,
        };
        let end = start.saturating_add(limit).min(shard.records.len());
        let records = shard.records[start..end].to_vec();

        Ok(ShardBatch {
            records,
            ended: shard.ended && end == shard.records.len(),
        })
    }

    /// Closes a shard. Its records can still be read, but nothing is appended to it anymore.
    pub fn end_shard(&self, topic: &str, shard_id: &str) -> DeliveryResult<()> {
        let mut inner = self.lock();
        let shards = Self::shards_mut(&mut inner, topic)?;

        let Some(shard) = shards.iter_mut().find(|shard| shard.id == shard_id) else {
            bail!(
                ErrorKind::ShardNotFound,
                "Shard not found",
                format!("topic {topic}, shard {shard_id}")
            );
        };
        shard.ended = true;

        debug!(topic, shard_id, "ended shard");

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn shards<'a>(inner: &'a Inner, topic: &str) -> DeliveryResult<&'a [Shard]> {
        match inner.topics.get(topic) {
            Some(shards) => Ok(shards.as_slice()),
            None => bail!(ErrorKind::TopicNotFound, "Topic not found", format!("topic {topic}")),
        }
    }

    fn shards_mut<'a>(inner: &'a mut Inner, topic: &str) -> DeliveryResult<&'a mut [Shard]> {
        match inner.topics.get_mut(topic) {
            Some(shards) => Ok(shards.as_mut_slice()),
            None => bail!(ErrorKind::TopicNotFound, "Topic not found", format!("topic {topic}")),
        }
    }

    fn shard<'a>(inner: &'a Inner, topic: &str, shard_id: &str) -> DeliveryResult<&'a Shard> {
        match Self::shards(inner, topic)?
            .iter()
            .find(|shard| shard.id == shard_id)
        {
            Some(shard) => Ok(shard),
            None => bail!(
                ErrorKind::ShardNotFound,
                "Shard not found",
                format!("topic {topic}, shard {shard_id}")
            ),
        }
    }
}

fn partition(partition_key: &str, shard_count: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    partition_key.hash(&mut hasher);

    (hasher.finish() % shard_count as u64) as usize
}
