//! Topic handlers with redelivery
//!
//! The dispatcher reads a topic subscription and hands every message to a
//! [`MessageHandler`]. Transient failures go to the redelivery service and
//! are republished on the same topic once their backoff elapses; permanent
//! failures, and messages out of retries, are nacked and end up on the
//! undeliverable topic. Handing a message to redelivery is bounded by half
//! the pub/sub ack timeout so the delivered copy is settled by the
//! dispatcher, never by the timeout.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::mempubsub::MemPubSub;
use crate::message::Message;
use crate::redelivery::RedeliveryService;

/// Metadata key holding the topic a redelivered message returns to
pub const REDELIVERY_TOPIC: &str = "redelivery_topic";

/// Handles the messages of one topic
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, msg: &Message) -> orb_core::Result<()>;
}

/// Binds handlers to topics
pub struct Dispatcher {
    pubsub: Arc<MemPubSub>,
    redelivery: Arc<RedeliveryService>,
    retry_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pubsub: Arc<MemPubSub>, redelivery: Arc<RedeliveryService>) -> Self {
        let retry_timeout = pubsub.config().timeout / 2;

        Self {
            pubsub,
            redelivery,
            retry_timeout,
        }
    }

    /// Republish messages emitted by the redelivery service on their topic.
    ///
    /// `due` is the receiver returned by [`RedeliveryService::new`].
    pub fn start(&self, mut due: mpsc::Receiver<Message>) {
        let pubsub = self.pubsub.clone();

        tokio::spawn(async move {
            while let Some(msg) = due.recv().await {
                let Some(topic) = msg.metadata_value(REDELIVERY_TOPIC).map(str::to_string) else {
                    tracing::warn!(msg_id = %msg.uuid, "Redelivered message has no topic; dropping");
                    continue;
                };

                tracing::debug!(topic = %topic, msg_id = %msg.uuid, "Republishing message");

                if let Err(e) = pubsub.publish(&topic, vec![msg]).await {
                    tracing::warn!(topic = %topic, error = %e, "Failed to republish message");
                }
            }

            tracing::debug!("Redelivery republisher exited");
        });
    }

    /// Subscribe `handler` to `topic`
    pub fn subscribe(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        let mut rx = self.pubsub.subscribe(topic)?;
        let redelivery = self.redelivery.clone();
        let retry_timeout = self.retry_timeout;
        let topic = topic.to_string();

        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let handler = handler.clone();
                let redelivery = redelivery.clone();
                let topic = topic.clone();

                tokio::spawn(async move {
                    dispatch(&topic, handler.as_ref(), &redelivery, retry_timeout, msg).await;
                });
            }

            tracing::debug!(topic = %topic, "Subscription closed");
        });

        Ok(())
    }
}

async fn dispatch(
    topic: &str,
    handler: &dyn MessageHandler,
    redelivery: &RedeliveryService,
    retry_timeout: Duration,
    msg: Message,
) {
    match handler.handle(&msg).await {
        Ok(()) => {
            msg.ack();
        }
        Err(e) if e.is_transient() => {
            let mut retry = msg.copy();
            retry.set_metadata(REDELIVERY_TOPIC, topic);

            match tokio::time::timeout(retry_timeout, redelivery.add(&retry)).await {
                Ok(Ok(at)) => {
                    tracing::info!(
                        topic = %topic,
                        msg_id = %msg.uuid,
                        error = %e,
                        redeliver_at = %at,
                        "Transient error handling message; scheduled for redelivery"
                    );
                    msg.ack();
                }
                Ok(Err(re)) => {
                    tracing::warn!(
                        topic = %topic,
                        msg_id = %msg.uuid,
                        error = %e,
                        redelivery_error = %re,
                        "Transient error handling message; giving up"
                    );
                    msg.nack();
                }
                Err(_) => {
                    tracing::warn!(
                        topic = %topic,
                        msg_id = %msg.uuid,
                        error = %e,
                        "Transient error handling message; redelivery queue full"
                    );
                    msg.nack();
                }
            }
        }
        Err(e) => {
            tracing::warn!(
                topic = %topic,
                msg_id = %msg.uuid,
                error = %e,
                "Permanent error handling message"
            );
            msg.nack();
        }
    }
}
