#![cfg(feature = "test-utils")]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use delivery::error::ErrorKind;
use delivery::message::Message;
use delivery::stream::MessageStream;
use delivery::subscriber::{HandleResult, Subscriber};
use delivery::test_utils::observer::RecordingObserver;
use delivery::test_utils::producer::ScriptedProducerFactory;
use delivery_telemetry::tracing::init_test_tracing;
use futures::StreamExt;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

/// Spawns `consumers` tasks that drain `stream` until it closes.
///
/// Each consumer rejects every `reject_every`-th message it receives (never when zero) and acks
/// the rest, recording the ids of the acked messages.
fn spawn_consumers(
    stream: &MessageStream,
    consumers: usize,
    reject_every: usize,
) -> (JoinSet<()>, Arc<Mutex<Vec<String>>>) {
    let acked = Arc::new(Mutex::new(Vec::new()));
    let mut tasks = JoinSet::new();

    for _ in 0..consumers {
        let stream = stream.clone();
        let acked = acked.clone();
        tasks.spawn(async move {
            let mut received = 0;
            while let Some(message) = stream.recv().await {
                received += 1;
                if reject_every > 0 && received % reject_every == 0 {
                    message.nack();
                    continue;
                }

                let uuid = message.uuid().to_owned();
                if message.ack() {
                    acked.lock().unwrap().push(uuid);
                }
            }
        });
    }

    (tasks, acked)
}

async fn join_all(mut tasks: JoinSet<()>) {
    while let Some(result) = timeout(WAIT, tasks.join_next()).await.unwrap() {
        result.unwrap();
    }
}

async fn deliver_all_with_consumers(reject_every: usize) {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(10, 100);
    let probe = factory.probe();
    let observer = Arc::new(RecordingObserver::default());
    let subscriber = Subscriber::with_observer(factory, observer.clone());

    let stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();
    let (consumers, acked) = spawn_consumers(&stream, 50, reject_every);

    probe.wait_for(|state| state.continued == 1000).await;
    timeout(WAIT, subscriber.close()).await.unwrap().unwrap();
    join_all(consumers).await;

    let acked = acked.lock().unwrap();
    let unique: HashSet<&String> = acked.iter().collect();
    assert_eq!(acked.len(), 1000);
    assert_eq!(unique.len(), 1000);

    let state = probe.state();
    assert_eq!(state.continued, 1000);
    assert_eq!(state.shutdowns, 1);
    assert_eq!(state.stopped, 0);
    assert_eq!(observer.snapshot().closed, vec!["topic".to_owned()]);
    if reject_every > 0 {
        assert!(observer.redeliveries() > 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn every_message_is_acked_exactly_once_across_consumers() {
    deliver_all_with_consumers(0).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rejected_messages_are_redistributed_and_acked_exactly_once() {
    deliver_all_with_consumers(7).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rejected_message_is_redelivered_with_same_identity() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(1, 1);
    let probe = factory.probe();
    let observer = Arc::new(RecordingObserver::default());
    let subscriber = Subscriber::with_observer(factory, observer.clone());
    let stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();

    let mut attempts = Vec::new();
    for _ in 0..3 {
        let message = timeout(WAIT, stream.recv()).await.unwrap().unwrap();
        attempts.push((message.uuid().to_owned(), message.payload().clone()));
        assert!(message.nack());
    }
    let message = timeout(WAIT, stream.recv()).await.unwrap().unwrap();
    attempts.push((message.uuid().to_owned(), message.payload().clone()));
    assert!(message.ack());

    probe.wait_for(|state| state.continued == 1).await;
    assert!(attempts.windows(2).all(|pair| pair[0] == pair[1]));
    assert_eq!(attempts[0].0, "topic-0-0");
    assert_eq!(observer.redeliveries(), 3);

    subscriber.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_with_cancelled_parent_returns_closed_stream() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(1, 1);
    let probe = factory.probe();
    let subscriber = Subscriber::new(factory);

    let parent = CancellationToken::new();
    parent.cancel();
    let stream = subscriber.subscribe(&parent, "topic").unwrap();

    assert!(stream.is_closed());
    assert!(timeout(WAIT, stream.recv()).await.unwrap().is_none());
    assert_eq!(probe.state().created, 0);

    // Nothing was left outstanding, so closing does not wait.
    timeout(Duration::from_secs(1), subscriber.close())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn subscribing_after_close_returns_closed_stream() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(1, 1);
    let probe = factory.probe();
    let subscriber = Subscriber::new(factory);
    subscriber.close().await.unwrap();

    let stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();

    assert!(subscriber.is_closed());
    assert!(stream.recv().await.is_none());
    assert_eq!(probe.state().created, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn start_failure_is_returned_and_leaves_nothing_running() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new()
        .with_lanes(2, 5)
        .failing_start();
    let probe = factory.probe();
    let observer = Arc::new(RecordingObserver::default());
    let subscriber = Subscriber::with_observer(factory, observer.clone());

    let err = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ProducerStartFailed);
    assert_eq!(observer.snapshot().subscribe_failures, vec!["topic".to_owned()]);

    let state = probe.state();
    assert_eq!(state.created, 1);
    assert_eq!(state.started, 0);

    // The scope acquired for the failed subscription was reported done.
    timeout(Duration::from_secs(1), subscriber.close())
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn close_waits_for_producer_shutdown_and_closes_streams() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(3, 10);
    let probe = factory.probe();
    let subscriber = Subscriber::new(factory);

    let first = subscriber
        .subscribe(&CancellationToken::new(), "first")
        .unwrap();
    let second = subscriber
        .subscribe(&CancellationToken::new(), "second")
        .unwrap();

    // Hold one delivered message undecided; closing must still complete.
    let held = timeout(WAIT, first.recv()).await.unwrap().unwrap();
    probe.wait_for(|state| state.started == 2).await;

    timeout(WAIT, subscriber.close()).await.unwrap().unwrap();

    let state = probe.state();
    assert_eq!(state.shutdowns, 2);
    assert!(state.stopped >= 1);
    assert!(first.is_closed());
    assert!(second.is_closed());
    assert!(first.recv().await.is_none());
    assert!(second.recv().await.is_none());

    // The lane that delivered the held message stopped without accepting it.
    assert!(!held.ack());

    // Once shutdown returned, handlers of both subscriptions refuse further deliveries.
    let stopped_before = probe.state().stopped;
    for index in 0..2 {
        let handler = probe.handler(index).unwrap();
        let result = timeout(WAIT, handler.handle(Message::new("late", "a")))
            .await
            .unwrap();
        assert_eq!(result, HandleResult::Stop);
    }
    assert_eq!(probe.state().stopped, stopped_before);
    assert!(first.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_close_calls_all_complete() {
    init_test_tracing();

    let subscriber = Subscriber::new(ScriptedProducerFactory::new().with_lanes(2, 10));
    let _stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();

    let mut closes = JoinSet::new();
    for _ in 0..4 {
        let subscriber = subscriber.clone();
        closes.spawn(async move { subscriber.close().await });
    }

    while let Some(result) = timeout(WAIT, closes.join_next()).await.unwrap() {
        result.unwrap().unwrap();
    }
    subscriber.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn parent_cancellation_closes_only_its_subscription() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(1, 10);
    let probe = factory.probe();
    let observer = Arc::new(RecordingObserver::default());
    let subscriber = Subscriber::with_observer(factory, observer.clone());

    let cancelled_parent = CancellationToken::new();
    let cancelled = subscriber.subscribe(&cancelled_parent, "cancelled").unwrap();
    let live = subscriber
        .subscribe(&CancellationToken::new(), "live")
        .unwrap();

    cancelled_parent.cancel();
    assert!(timeout(WAIT, cancelled.recv()).await.unwrap().is_none());
    observer
        .wait_for(|events| events.closed == vec!["cancelled".to_owned()])
        .await;
    assert_eq!(probe.state().shutdowns, 1);

    let message = timeout(WAIT, live.recv()).await.unwrap().unwrap();
    assert!(message.uuid().starts_with("live-"));
    assert!(message.ack());

    subscriber.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn handler_stops_once_subscription_is_closed() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new();
    let probe = factory.probe();
    let subscriber = Subscriber::new(factory);
    let stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();

    let handler = probe.handler(0).unwrap();
    assert_eq!(handler.topic(), "topic");

    subscriber.close().await.unwrap();

    assert!(handler.is_cancelled());
    let result = timeout(WAIT, handler.handle(Message::new("late", "a")))
        .await
        .unwrap();
    assert_eq!(result, HandleResult::Stop);
    assert!(stream.recv().await.is_none());
}

#[tokio::test(flavor = "multi_thread")]
async fn stream_adapter_yields_messages_in_lane_order() {
    init_test_tracing();

    let factory = ScriptedProducerFactory::new().with_lanes(1, 5);
    let subscriber = Subscriber::new(factory);
    let stream = subscriber
        .subscribe(&CancellationToken::new(), "topic")
        .unwrap();

    let uuids: Vec<String> = timeout(
        WAIT,
        stream
            .into_stream()
            .take(5)
            .map(|message| {
                let uuid = message.uuid().to_owned();
                message.ack();
                uuid
            })
            .collect(),
    )
    .await
    .unwrap();

    let expected: Vec<String> = (0..5).map(|index| format!("topic-0-{index}")).collect();
    assert_eq!(uuids, expected);

    subscriber.close().await.unwrap();
}
