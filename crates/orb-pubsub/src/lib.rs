//! # Orb Pub/Sub
//!
//! Messaging for the witnessing subsystem.
//!
//! - `message` - messages with per-copy Ack/Nack
//! - `mempubsub` - single-node topic bus; unacknowledged messages are
//!   dead-lettered to [`UNDELIVERABLE_TOPIC`]
//! - `redelivery` - delayed re-submission with exponential backoff
//! - `dispatcher` - binds a handler to a topic, routing transient failures
//!   through redelivery

pub mod dispatcher;
pub mod error;
pub mod mempubsub;
pub mod message;
pub mod redelivery;

pub use dispatcher::{Dispatcher, MessageHandler, REDELIVERY_TOPIC};
pub use error::{PubSubError, Result};
pub use mempubsub::{MemPubSub, PubSubConfig};
pub use message::{AckState, Message};
pub use redelivery::{RedeliveryConfig, RedeliveryService, REDELIVERY_ATTEMPTS};

/// Reserved dead-letter topic
pub const UNDELIVERABLE_TOPIC: &str = "orb.undeliverable";
