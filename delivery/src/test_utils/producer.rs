use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::error;

use crate::bail;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::{DeliveryResult, ErrorKind};
use crate::message::Message;
use crate::subscriber::{HandleResult, MessageHandler, Producer, ProducerFactory};
use crate::test_utils::DEFAULT_WAIT_TIMEOUT;

/// Counters describing what happened to the producers of a [`ScriptedProducerFactory`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeState {
    pub created: usize,
    pub started: usize,
    pub shutdowns: usize,
    /// Handler calls that returned [`HandleResult::Continue`].
    pub continued: usize,
    /// Handler calls that returned [`HandleResult::Stop`].
    pub stopped: usize,
}

/// Shared view over the producers created by a factory.
#[derive(Debug)]
pub struct ProducerProbe {
    state: watch::Sender<ProbeState>,
    handlers: Mutex<Vec<MessageHandler>>,
}

impl ProducerProbe {
    pub fn state(&self) -> ProbeState {
        *self.state.borrow()
    }

    /// Returns the handler given to the `index`-th created producer.
    pub fn handler(&self, index: usize) -> Option<MessageHandler> {
        let handlers = self.handlers.lock().unwrap();
        handlers.get(index).cloned()
    }

    /// Waits until `condition` holds for the probe state.
    ///
    /// # Panics
    ///
    /// Panics if the condition does not hold within [`DEFAULT_WAIT_TIMEOUT`].
    pub async fn wait_for(&self, condition: impl FnMut(&ProbeState) -> bool) {
        let mut state = self.state.subscribe();
        match timeout(DEFAULT_WAIT_TIMEOUT, state.wait_for(condition)).await {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => panic!("producer probe dropped while waiting"),
            Err(_) => panic!(
                "producer probe did not reach the expected state within {DEFAULT_WAIT_TIMEOUT:?}: {:?}",
                self.state()
            ),
        }
    }

    fn update(&self, update: impl FnOnce(&mut ProbeState)) {
        self.state.send_modify(update);
    }
}

/// Factory of [`ScriptedProducer`]s.
///
/// Each producer runs `lanes` lanes that deliver `messages_per_lane` generated messages, one at a
/// time, and stop at the first [`HandleResult::Stop`].
#[derive(Debug, Clone)]
pub struct ScriptedProducerFactory {
    probe: Arc<ProducerProbe>,
    lanes: usize,
    messages_per_lane: usize,
    fail_start: bool,
}

impl ScriptedProducerFactory {
    /// Creates a factory whose producers run no lanes.
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProbeState::default());

        Self {
            probe: Arc::new(ProducerProbe {
                state,
                handlers: Mutex::new(Vec::new()),
            }),
            lanes: 0,
            messages_per_lane: 0,
            fail_start: false,
        }
    }

    pub fn with_lanes(mut self, lanes: usize, messages_per_lane: usize) -> Self {
        self.lanes = lanes;
        self.messages_per_lane = messages_per_lane;
        self
    }

    /// Makes every created producer fail in [`Producer::start`].
    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn probe(&self) -> Arc<ProducerProbe> {
        self.probe.clone()
    }
}

impl Default for ScriptedProducerFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ProducerFactory for ScriptedProducerFactory {
    type Producer = ScriptedProducer;

    fn create(&self, handler: MessageHandler, topic: &str) -> ScriptedProducer {
        self.probe.update(|state| state.created += 1);
        self.probe.handlers.lock().unwrap().push(handler.clone());

        ScriptedProducer {
            topic: topic.to_owned(),
            handler,
            probe: self.probe.clone(),
            lanes: self.lanes,
            messages_per_lane: self.messages_per_lane,
            fail_start: self.fail_start,
            shutdown_tx: None,
            workers: JoinSet::new(),
        }
    }
}

/// Producer delivering generated messages with ids `{topic}-{lane}-{index}`.
#[derive(Debug)]
pub struct ScriptedProducer {
    topic: String,
    handler: MessageHandler,
    probe: Arc<ProducerProbe>,
    lanes: usize,
    messages_per_lane: usize,
    fail_start: bool,
    shutdown_tx: Option<ShutdownTx>,
    workers: JoinSet<()>,
}

impl Producer for ScriptedProducer {
    fn start(&mut self) -> DeliveryResult<()> {
        if self.fail_start {
            bail!(
                ErrorKind::ProducerStartFailed,
                "Scripted producer configured to fail on start"
            );
        }

        let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
        for lane in 0..self.lanes {
            let handler = self.handler.clone();
            let probe = self.probe.clone();
            let shutdown_rx = shutdown_rx.clone();
            let topic = self.topic.clone();
            let messages = self.messages_per_lane;

            self.workers.spawn(async move {
                for index in 0..messages {
                    if shutdown_rx.is_shutdown() {
                        return;
                    }

                    let uuid = format!("{topic}-{lane}-{index}");
                    let message = Message::new(uuid.clone(), uuid);
                    match handler.handle(message).await {
                        HandleResult::Continue => probe.update(|state| state.continued += 1),
                        HandleResult::Stop => {
                            probe.update(|state| state.stopped += 1);
                            return;
                        }
                    }
                }
            });
        }

        self.shutdown_tx = Some(shutdown_tx);
        self.probe.update(|state| state.started += 1);

        Ok(())
    }

    async fn shutdown(&mut self) -> DeliveryResult<()> {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            shutdown_tx.shutdown();
        }

        while let Some(result) = self.workers.join_next().await {
            if let Err(err) = result {
                error!(error = %err, "scripted lane failed");
            }
        }

        self.probe.update(|state| state.shutdowns += 1);

        Ok(())
    }
}
