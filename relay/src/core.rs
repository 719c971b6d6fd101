use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use delivery::memory::{MemoryPublisher, MemoryStream, MemorySubscriberBuilder};
use delivery::message::Message;
use delivery::publisher::Publisher;
use delivery::store::MemoryCheckpointStore;
use delivery::stream::MessageStream;
use delivery::types::PARTITION_KEY_KEY;
use delivery_config::shared::RelayConfig;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Number of distinct partition keys used for demo messages.
const DEMO_PARTITION_KEYS: usize = 16;

/// Runtime options taken from the command line.
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub messages: usize,
    pub consumers: usize,
    pub exit_after: Option<Duration>,
}

/// Runs the relay until a shutdown signal arrives or the configured deadline passes.
#[tracing::instrument(skip_all, fields(topic = %config.topic))]
pub async fn start_relay(config: RelayConfig, options: RelayOptions) -> anyhow::Result<()> {
    let stream = MemoryStream::new();
    stream.create_topic(&config.topic, config.shard_count)?;

    publish_demo_messages(&stream, &config, options.messages).await?;

    let store = MemoryCheckpointStore::new();
    let subscriber = MemorySubscriberBuilder::new(stream, store.clone())
        .with_config(config.consumer.clone())
        .build()?;
    let messages = subscriber.subscribe(&CancellationToken::new(), &config.topic)?;

    let acked = Arc::new(AtomicUsize::new(0));
    let mut consumers = JoinSet::new();
    for consumer_id in 0..options.consumers {
        consumers.spawn(consume(consumer_id, messages.clone(), acked.clone()));
    }

    wait_for_shutdown(options.exit_after).await?;

    info!("shutting down relay");
    subscriber.close().await?;

    while let Some(result) = consumers.join_next().await {
        if let Err(err) = result {
            warn!(error = %err, "consumer task failed");
        }
    }

    let checkpoints = store.checkpoints().await;
    info!(
        acked = acked.load(Ordering::Relaxed),
        checkpointed_shards = checkpoints.len(),
        "relay stopped"
    );

    Ok(())
}

/// Publishes `count` demo messages in calls of at most `publisher.max_messages` messages.
async fn publish_demo_messages(
    stream: &MemoryStream,
    config: &RelayConfig,
    count: usize,
) -> anyhow::Result<()> {
    let publisher = MemoryPublisher::new(stream.clone()).with_config(config.publisher.clone());

    let mut published = 0;
    while published < count {
        let chunk_end = count.min(published + config.publisher.max_messages);
        let messages = (published..chunk_end)
            .map(|index| {
                let mut message = Message::with_random_uuid(format!("demo message {index}"));
                message.set_metadata(
                    PARTITION_KEY_KEY,
                    format!("key-{}", index % DEMO_PARTITION_KEYS),
                );
                message
            })
            .collect();

        publisher.publish(&config.topic, messages).await?;
        published = chunk_end;
    }
    publisher.close().await?;

    info!(published, "published demo messages");

    Ok(())
}

/// Acks every message until the subscription closes.
async fn consume(consumer_id: usize, messages: MessageStream, acked: Arc<AtomicUsize>) {
    while let Some(message) = messages.recv().await {
        debug!(
            consumer_id,
            message_uuid = message.uuid(),
            payload = %String::from_utf8_lossy(message.payload()),
            "received message"
        );

        if message.ack() {
            acked.fetch_add(1, Ordering::Relaxed);
        }
    }

    debug!(consumer_id, "message stream closed");
}

/// Waits for SIGINT or SIGTERM, or for `exit_after` to elapse when set.
async fn wait_for_shutdown(exit_after: Option<Duration>) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let deadline = async {
        match exit_after {
            Some(exit_after) => tokio::time::sleep(exit_after).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("sigint (ctrl+c) received");
        }
        _ = sigterm.recv() => {
            info!("sigterm received");
        }
        _ = deadline => {
            info!("exit deadline reached");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use delivery_config::shared::{ConsumerConfig, PublisherConfig};

    use super::*;

    fn config(max_messages: usize) -> RelayConfig {
        RelayConfig {
            topic: "relay-test".to_owned(),
            shard_count: 2,
            consumer: ConsumerConfig {
                max_records: 10,
                idle_poll_interval_ms: 10,
            },
            publisher: PublisherConfig { max_messages },
        }
    }

    #[tokio::test]
    async fn demo_messages_are_published_in_chunks() {
        let config = config(3);
        let stream = MemoryStream::new();
        stream.create_topic(&config.topic, config.shard_count).unwrap();

        publish_demo_messages(&stream, &config, 10).await.unwrap();

        let mut total = 0;
        for shard in stream.shard_ids(&config.topic).unwrap() {
            total += stream
                .get_records(&config.topic, &shard, None, usize::MAX)
                .unwrap()
                .records
                .len();
        }
        assert_eq!(total, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn relay_stops_after_deadline() {
        let options = RelayOptions {
            messages: 25,
            consumers: 3,
            exit_after: Some(Duration::from_millis(200)),
        };

        tokio::time::timeout(Duration::from_secs(10), start_relay(config(10), options))
            .await
            .unwrap()
            .unwrap();
    }
}
