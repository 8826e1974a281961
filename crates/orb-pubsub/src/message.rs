//! Messages with Ack/Nack tracking
//!
//! Every delivered copy of a message carries its own acknowledgement state,
//! so one subscriber acknowledging never affects another. The first Ack or
//! Nack on a copy is final.

use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Acknowledgement state of a delivered copy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckState {
    Pending,
    Acked,
    Nacked,
}

/// Pub/sub message
#[derive(Debug)]
pub struct Message {
    pub uuid: String,
    pub payload: Bytes,
    pub metadata: HashMap<String, String>,
    ack: Arc<watch::Sender<AckState>>,
}

impl Message {
    pub fn new(uuid: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        let (ack, _) = watch::channel(AckState::Pending);

        Self {
            uuid: uuid.into(),
            payload: payload.into(),
            metadata: HashMap::new(),
            ack: Arc::new(ack),
        }
    }

    /// Message with a random UUID
    pub fn with_payload(payload: impl Into<Bytes>) -> Self {
        Self::new(uuid::Uuid::new_v4().to_string(), payload)
    }

    /// Independent copy: same UUID, payload and metadata, fresh Ack/Nack state
    pub fn copy(&self) -> Self {
        let mut msg = Self::new(self.uuid.clone(), self.payload.clone());
        msg.metadata = self.metadata.clone();
        msg
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Acknowledge the message. Returns `false` if it was already acked or nacked.
    pub fn ack(&self) -> bool {
        self.settle(AckState::Acked)
    }

    /// Negatively acknowledge the message. Returns `false` if it was already acked or nacked.
    pub fn nack(&self) -> bool {
        self.settle(AckState::Nacked)
    }

    pub fn ack_state(&self) -> AckState {
        *self.ack.borrow()
    }

    /// Observer of this copy's outcome
    pub(crate) fn watcher(&self) -> AckWatcher {
        AckWatcher {
            rx: self.ack.subscribe(),
        }
    }

    fn settle(&self, outcome: AckState) -> bool {
        self.ack.send_if_modified(|state| {
            if *state == AckState::Pending {
                *state = outcome;
                true
            } else {
                false
            }
        })
    }
}

/// Waits for the terminal outcome of one delivered copy
pub(crate) struct AckWatcher {
    rx: watch::Receiver<AckState>,
}

impl AckWatcher {
    /// Outcome of the copy, or `None` if neither Ack nor Nack arrived in time.
    ///
    /// A copy dropped by its consumer without an Ack counts as a Nack.
    pub(crate) async fn outcome(mut self, timeout: Duration) -> Option<AckState> {
        let wait = async {
            match self.rx.wait_for(|s| *s != AckState::Pending).await {
                Ok(state) => *state,
                Err(_) => AckState::Nacked,
            }
        };

        tokio::time::timeout(timeout, wait).await.ok()
    }
}
