//! # Orb Core
//!
//! Shared building blocks for the Orb anchor witnessing subsystem.
//!
//! This crate provides:
//! - `Witness` / `WitnessProof` - participants asked to attest an anchor and what they return
//! - `AnchorIndexStatus` - the per-anchor witnessing state (`in-process` / `completed`)
//! - `OrbError` - the error type shared across crates, classified as transient or permanent
//! - `Lifecycle` - the start/stop gate used by every long-running service
//!
//! ## Witnessing flow
//!
//! ```text
//!   anchor credential
//!          │
//!          ▼
//!   ┌──────────────┐  offers   ┌──────────┐  retries  ┌────────────┐
//!   │   Witness    │──────────►│  Pub/Sub │◄─────────►│ Redelivery │
//!   │   Handler    │           └────┬─────┘           └────────────┘
//!   └──────────────┘                │ outbox
//!          ▲                        ▼
//!          │ proofs           remote witnesses
//!   ┌──────┴───────┐
//!   │ Proof Handler│──► policy evaluation ──► status = completed
//!   └──────────────┘
//! ```

pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod types;

pub use error::*;
pub use handler::PolicyHandler;
pub use lifecycle::{Lifecycle, State};
pub use types::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::error::{OrbError, Result};
    pub use crate::handler::PolicyHandler;
    pub use crate::lifecycle::{Lifecycle, State};
    pub use crate::types::*;
}
