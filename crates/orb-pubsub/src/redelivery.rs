//! Delayed redelivery with exponential backoff
//!
//! A message handed to [`RedeliveryService::add`] is held for a backoff
//! derived from its `redelivery_attempts` metadata and then emitted on the
//! receiver returned by [`RedeliveryService::new`]. At most `max_messages`
//! messages are in flight; further callers wait for a free slot.

use chrono::{DateTime, Utc};
use orb_core::lifecycle::{Lifecycle, State};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};

use crate::error::{PubSubError, Result};
use crate::message::Message;

/// Metadata key holding the number of redeliveries so far
pub const REDELIVERY_ATTEMPTS: &str = "redelivery_attempts";

/// Redelivery configuration
#[derive(Clone, Debug)]
pub struct RedeliveryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_factor: f64,
    pub max_messages: usize,
}

impl Default for RedeliveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
            backoff_factor: 1.5,
            max_messages: 20,
        }
    }
}

impl RedeliveryConfig {
    /// Delay before redelivering a message that was already redelivered
    /// `attempts` times: `initial * factor^attempts`, capped at `max_backoff`.
    pub fn backoff(&self, attempts: u32) -> Duration {
        let max = self.max_backoff.as_secs_f64();
        let mut secs = self.initial_backoff.as_secs_f64();

        for _ in 0..attempts {
            secs *= self.backoff_factor;
            if secs >= max {
                break;
            }
        }

        if !secs.is_finite() || secs >= max {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs.max(0.0)).max(self.initial_backoff)
        }
    }
}

/// Parsed `redelivery_attempts` metadata; absent means zero
fn attempts(msg: &Message) -> Result<u32> {
    match msg.metadata_value(REDELIVERY_ATTEMPTS) {
        None => Ok(0),
        Some(raw) => raw.trim().parse().map_err(|_| PubSubError::InvalidAttempts {
            value: raw.to_string(),
        }),
    }
}

struct Entry {
    message: Message,
    backoff: Duration,
    permit: OwnedSemaphorePermit,
}

/// Redelivery service
pub struct RedeliveryService {
    config: RedeliveryConfig,
    lifecycle: Lifecycle,
    entry_tx: Mutex<Option<mpsc::Sender<Entry>>>,
    entry_rx: Mutex<Option<mpsc::Receiver<Entry>>>,
    slots: Arc<Semaphore>,
    notify_tx: mpsc::Sender<Message>,
    done_tx: watch::Sender<bool>,
}

impl RedeliveryService {
    /// Create the service and the receiver on which due messages are emitted
    pub fn new(config: RedeliveryConfig) -> (Self, mpsc::Receiver<Message>) {
        let capacity = config.max_messages.max(1);
        let (entry_tx, entry_rx) = mpsc::channel(capacity);
        let (notify_tx, notify_rx) = mpsc::channel(1);
        let (done_tx, _) = watch::channel(false);

        let service = Self {
            config,
            lifecycle: Lifecycle::new("redelivery"),
            entry_tx: Mutex::new(Some(entry_tx)),
            entry_rx: Mutex::new(Some(entry_rx)),
            slots: Arc::new(Semaphore::new(capacity)),
            notify_tx,
            done_tx,
        };

        (service, notify_rx)
    }

    pub fn config(&self) -> &RedeliveryConfig {
        &self.config
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Start the monitor task. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.lifecycle.start(|| {
            if let Some(rx) = self.entry_rx.lock().take() {
                tokio::spawn(monitor(
                    rx,
                    self.notify_tx.clone(),
                    self.done_tx.subscribe(),
                ));
            }
        });
    }

    /// Stop the service. Pending messages are dropped without being emitted.
    pub fn stop(&self) {
        self.lifecycle.stop(|| {
            tracing::info!("Stopping redelivery service");

            self.entry_tx.lock().take();
            self.done_tx.send_replace(true);
            self.slots.close();
        });
    }

    /// Schedule a copy of `msg` for redelivery and return when it will be
    /// emitted.
    ///
    /// The copy carries an incremented `redelivery_attempts` and its own
    /// Ack/Nack state. Waits while `max_messages` messages are already
    /// pending.
    pub async fn add(&self, msg: &Message) -> Result<DateTime<Utc>> {
        if !self.lifecycle.is_started() {
            return Err(PubSubError::NotStarted);
        }

        let attempts = attempts(msg)?;
        if attempts >= self.config.max_retries {
            return Err(PubSubError::MaxRetriesExceeded {
                max_retries: self.config.max_retries,
            });
        }

        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PubSubError::NotStarted)?;

        let sender = self.entry_tx.lock().clone().ok_or(PubSubError::NotStarted)?;

        let backoff = self.config.backoff(attempts);

        let mut msg = msg.copy();
        msg.set_metadata(REDELIVERY_ATTEMPTS, (attempts + 1).to_string());

        let redeliver_at = Utc::now()
            + chrono::Duration::from_std(backoff).unwrap_or_else(|_| chrono::Duration::zero());

        tracing::debug!(
            msg_id = %msg.uuid,
            attempt = attempts + 1,
            backoff_ms = backoff.as_millis() as u64,
            "Scheduling redelivery"
        );

        sender
            .send(Entry {
                message: msg,
                backoff,
                permit,
            })
            .await
            .map_err(|_| PubSubError::NotStarted)?;

        Ok(redeliver_at)
    }
}

async fn monitor(
    mut rx: mpsc::Receiver<Entry>,
    notify: mpsc::Sender<Message>,
    done: watch::Receiver<bool>,
) {
    loop {
        let mut stop = done.clone();

        let entry = tokio::select! {
            entry = rx.recv() => entry,
            _ = wait_done(&mut stop) => None,
        };

        let Some(entry) = entry else {
            break;
        };

        tokio::spawn(redeliver(entry, notify.clone(), done.clone()));
    }

    tracing::debug!("Redelivery monitor exited");
}

async fn redeliver(entry: Entry, notify: mpsc::Sender<Message>, mut done: watch::Receiver<bool>) {
    let Entry {
        message,
        backoff,
        permit,
    } = entry;

    tokio::select! {
        _ = tokio::time::sleep(backoff) => {}
        _ = wait_done(&mut done) => {
            tracing::debug!(msg_id = %message.uuid, "Service stopped; dropping message");
            return;
        }
    }

    let msg_id = message.uuid.clone();

    tokio::select! {
        res = notify.send(message) => {
            if res.is_err() {
                tracing::warn!(msg_id = %msg_id, "Redelivery receiver closed; dropping message");
            }
        }
        _ = wait_done(&mut done) => {
            tracing::debug!(msg_id = %msg_id, "Service stopped; dropping message");
        }
    }

    drop(permit);
}

async fn wait_done(done: &mut watch::Receiver<bool>) {
    // A dropped sender also means the service is gone
    let _ = done.wait_for(|stopped| *stopped).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::AckState;
    use proptest::prelude::*;

    fn fast_config() -> RedeliveryConfig {
        RedeliveryConfig {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            backoff_factor: 2.0,
            max_messages: 20,
        }
    }

    #[test]
    fn test_backoff_sequence() {
        let config = RedeliveryConfig::default();

        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(150));
        assert_eq!(config.backoff(2), Duration::from_millis(225));
        assert_eq!(config.backoff(10), Duration::from_secs(1));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(1));
    }

    proptest! {
        #[test]
        fn prop_backoff_is_bounded(
            attempts in 0u32..64,
            initial_ms in 1u64..1000,
            max_ms in 1u64..10_000,
            factor in 1.0f64..4.0,
        ) {
            let config = RedeliveryConfig {
                initial_backoff: Duration::from_millis(initial_ms),
                max_backoff: Duration::from_millis(max_ms),
                backoff_factor: factor,
                ..RedeliveryConfig::default()
            };

            let backoff = config.backoff(attempts);
            prop_assert!(backoff <= config.max_backoff);
            prop_assert!(backoff >= config.initial_backoff.min(config.max_backoff));
            prop_assert!(config.backoff(attempts + 1) >= backoff);
        }
    }

    #[tokio::test]
    async fn test_add_not_started() {
        let (service, _rx) = RedeliveryService::new(fast_config());

        let err = service.add(&Message::with_payload("p")).await.unwrap_err();
        assert_eq!(err, PubSubError::NotStarted);
    }

    #[tokio::test]
    async fn test_redelivers_with_incremented_attempts() {
        let (service, mut rx) = RedeliveryService::new(fast_config());
        service.start();

        let before = Utc::now();
        let at = service.add(&Message::new("m1", "payload")).await.unwrap();
        assert!(at >= before);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.uuid, "m1");
        assert_eq!(msg.metadata_value(REDELIVERY_ATTEMPTS), Some("1"));

        let at = service.add(&msg).await.unwrap();
        assert!(at >= before);

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.metadata_value(REDELIVERY_ATTEMPTS), Some("2"));

        service.stop();
    }

    #[tokio::test]
    async fn test_retry_has_its_own_ack_state() {
        let (service, mut rx) = RedeliveryService::new(fast_config());
        service.start();

        let original = Message::new("id-1", "payload");
        assert!(original.ack());

        service.add(&original).await.unwrap();

        let retry = rx.recv().await.unwrap();
        assert_eq!(retry.uuid, "id-1");
        assert_eq!(retry.ack_state(), AckState::Pending);
        assert!(retry.nack());

        // Settling the retry leaves the original untouched
        assert_eq!(original.ack_state(), AckState::Acked);
        assert_eq!(original.metadata_value(REDELIVERY_ATTEMPTS), None);

        service.stop();
    }

    #[tokio::test]
    async fn test_max_retries_exceeded() {
        let (service, _rx) = RedeliveryService::new(fast_config());
        service.start();

        let mut msg = Message::with_payload("p");
        msg.set_metadata(REDELIVERY_ATTEMPTS, "3");

        let err = service.add(&msg).await.unwrap_err();
        assert_eq!(err, PubSubError::MaxRetriesExceeded { max_retries: 3 });

        service.stop();
    }

    #[tokio::test]
    async fn test_invalid_attempts_metadata() {
        let (service, _rx) = RedeliveryService::new(fast_config());
        service.start();

        let mut msg = Message::with_payload("p");
        msg.set_metadata(REDELIVERY_ATTEMPTS, "three");

        let err = service.add(&msg).await.unwrap_err();
        assert_eq!(
            err,
            PubSubError::InvalidAttempts {
                value: "three".to_string()
            }
        );

        service.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_blocks_when_full() {
        let config = RedeliveryConfig {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(1),
            ..RedeliveryConfig::default()
        };
        let (service, mut rx) = RedeliveryService::new(config);
        let service = Arc::new(service);
        service.start();

        for i in 0..20 {
            service.add(&Message::new(format!("m{i}"), "p")).await.unwrap();
        }

        let blocked = {
            let service = service.clone();
            tokio::spawn(async move { service.add(&Message::new("m20", "p")).await })
        };

        // Nothing is due yet, so the 21st add stays blocked
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!blocked.is_finished());

        // Draining one due message frees a slot
        let first = rx.recv().await.unwrap();
        assert!(first.uuid.starts_with('m'));
        assert!(blocked.await.unwrap().is_ok());

        service.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_pending_messages() {
        let config = RedeliveryConfig {
            initial_backoff: Duration::from_secs(5),
            max_backoff: Duration::from_secs(5),
            ..RedeliveryConfig::default()
        };
        let (service, mut rx) = RedeliveryService::new(config);
        service.start();

        service.add(&Message::with_payload("p")).await.unwrap();
        service.stop();
        service.stop();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(service.state(), State::Stopped);

        let err = service.add(&Message::with_payload("p")).await.unwrap_err();
        assert_eq!(err, PubSubError::NotStarted);
    }
}
