//! In-memory publish/subscribe
//!
//! Each subscriber gets its own copy of every message published on its
//! topic. A watcher task tracks the outcome of every delivered copy: Acked
//! copies are done, Nacked or timed-out copies are forwarded to
//! [`UNDELIVERABLE_TOPIC`]. Forwarding never blocks; if a dead-letter
//! subscriber's buffer is full the message is dropped.

use orb_core::Lifecycle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::{PubSubError, Result};
use crate::message::{AckState, AckWatcher, Message};
use crate::UNDELIVERABLE_TOPIC;

type Subscribers = Arc<RwLock<Option<HashMap<String, Vec<mpsc::Sender<Message>>>>>>;

/// Pub/sub configuration
#[derive(Clone, Debug)]
pub struct PubSubConfig {
    /// How long a delivered copy may stay unacknowledged
    pub timeout: Duration,

    /// Capacity of every subscriber channel
    pub buffer_size: usize,

    /// Capacity of the internal ack-watch channel
    pub concurrency: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            buffer_size: 100,
            concurrency: 20,
        }
    }
}

/// Delivered copy awaiting its outcome
struct PendingAck {
    topic: String,
    /// Forwarded to the dead-letter topic on failure
    message: Message,
    watcher: AckWatcher,
}

/// In-memory pub/sub
pub struct MemPubSub {
    config: PubSubConfig,
    lifecycle: Lifecycle,
    subscribers: Subscribers,
    ack_tx: Mutex<Option<mpsc::Sender<PendingAck>>>,
    ack_rx: Mutex<Option<mpsc::Receiver<PendingAck>>>,
}

impl MemPubSub {
    pub fn new(name: &str, config: PubSubConfig) -> Self {
        let (ack_tx, ack_rx) = mpsc::channel(config.concurrency.max(1));

        Self {
            config,
            lifecycle: Lifecycle::new(name),
            subscribers: Arc::new(RwLock::new(Some(HashMap::new()))),
            ack_tx: Mutex::new(Some(ack_tx)),
            ack_rx: Mutex::new(Some(ack_rx)),
        }
    }

    pub fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Start the ack watcher. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.lifecycle.start(|| {
            if let Some(rx) = self.ack_rx.lock().take() {
                tokio::spawn(watch_acks(
                    self.lifecycle.name().to_string(),
                    rx,
                    self.subscribers.clone(),
                    self.config.timeout,
                ));
            }
        });
    }

    /// Close every subscriber channel and the ack-watch channel
    pub fn stop(&self) {
        self.lifecycle.stop(|| {
            tracing::info!(pubsub = %self.lifecycle.name(), "Closing pub/sub");

            // Dropping the senders closes the channels; later publishes see `None`
            self.subscribers.write().take();
            self.ack_tx.lock().take();
        });
    }

    /// Register a new subscriber on `topic`
    pub fn subscribe(&self, topic: &str) -> Result<mpsc::Receiver<Message>> {
        if !self.lifecycle.is_started() {
            return Err(PubSubError::NotStarted);
        }

        let (tx, rx) = mpsc::channel(self.config.buffer_size.max(1));

        let mut guard = self.subscribers.write();
        let topics = guard.as_mut().ok_or(PubSubError::Closed)?;
        topics.entry(topic.to_string()).or_default().push(tx);

        tracing::debug!(pubsub = %self.lifecycle.name(), topic = %topic, "Subscribed");
        Ok(rx)
    }

    /// Deliver a copy of every message to every subscriber of `topic`.
    ///
    /// Blocks while a subscriber's buffer or the ack-watch channel is full.
    pub async fn publish(&self, topic: &str, messages: Vec<Message>) -> Result<()> {
        if !self.lifecycle.is_started() {
            return Err(PubSubError::NotStarted);
        }

        // Never hold the lock across a send
        let subscribers = {
            let guard = self.subscribers.read();
            let topics = guard.as_ref().ok_or(PubSubError::Closed)?;
            topics.get(topic).cloned().unwrap_or_default()
        };

        if subscribers.is_empty() {
            tracing::debug!(topic = %topic, "No subscribers for topic");
            return Ok(());
        }

        let ack_tx = self.ack_tx.lock().clone().ok_or(PubSubError::Closed)?;
        let watched = topic != UNDELIVERABLE_TOPIC;

        for subscriber in &subscribers {
            for msg in &messages {
                let copy = msg.copy();

                if watched {
                    let pending = PendingAck {
                        topic: topic.to_string(),
                        message: msg.copy(),
                        watcher: copy.watcher(),
                    };

                    if ack_tx.send(pending).await.is_err() {
                        return Err(PubSubError::Closed);
                    }
                }

                // A closed subscriber drops the copy, which its watcher sees as a Nack
                if subscriber.send(copy).await.is_err() {
                    tracing::debug!(topic = %topic, msg_id = %msg.uuid, "Subscriber channel closed");
                }
            }
        }

        Ok(())
    }
}

async fn watch_acks(
    name: String,
    mut rx: mpsc::Receiver<PendingAck>,
    subscribers: Subscribers,
    timeout: Duration,
) {
    while let Some(pending) = rx.recv().await {
        let subscribers = subscribers.clone();

        tokio::spawn(async move {
            let PendingAck {
                topic,
                message,
                watcher,
            } = pending;

            match watcher.outcome(timeout).await {
                Some(AckState::Acked) => {
                    tracing::debug!(topic = %topic, msg_id = %message.uuid, "Message acknowledged");
                }
                Some(_) => {
                    tracing::warn!(topic = %topic, msg_id = %message.uuid, "Message nacked; sending to undeliverable");
                    forward_undeliverable(&subscribers, &topic, message);
                }
                None => {
                    tracing::warn!(topic = %topic, msg_id = %message.uuid, "Message timed out; sending to undeliverable");
                    forward_undeliverable(&subscribers, &topic, message);
                }
            }
        });
    }

    tracing::debug!(pubsub = %name, "Ack watcher exited");
}

fn forward_undeliverable(subscribers: &Subscribers, topic: &str, mut message: Message) {
    let targets = {
        let guard = subscribers.read();
        guard
            .as_ref()
            .and_then(|t| t.get(UNDELIVERABLE_TOPIC).cloned())
            .unwrap_or_default()
    };

    if targets.is_empty() {
        tracing::warn!(topic = %topic, msg_id = %message.uuid, "No undeliverable subscriber; message dropped");
        return;
    }

    message.set_metadata("original_topic", topic);

    for target in targets {
        if let Err(e) = target.try_send(message.copy()) {
            tracing::warn!(
                topic = %topic,
                msg_id = %message.uuid,
                error = %e,
                "Undeliverable channel unavailable; message dropped"
            );
        }
    }
}
