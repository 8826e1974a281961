//! # Orb Node
//!
//! Configuration, logging bootstrap and wiring of the witnessing services.
//!
//! ```toml
//! [node]
//! service_url = "https://orb.domain1.com/services/orb"
//!
//! [policy]
//! initial = "OutOf(1,system) LogRequired"
//!
//! [[witness.system_witnesses]]
//! uri = "https://orb.domain2.com/services/orb"
//! has_log = true
//! ```

pub mod collaborators;
pub mod config;
pub mod logging;
pub mod node;

pub use collaborators::{LocalOutbox, LoggingAnchorPublisher, StaticWitnessProvider};
pub use config::{LoggingConfig, NodeConfig};
pub use node::{Collaborators, OrbNode};
