//! # Orb VCT
//!
//! Verifiable credential transparency logs, from a witness's point of view.
//!
//! ## Components
//!
//! - **Merkle**: RFC 6962 leaf/node hashing, compact-range roots and
//!   consistency proof verification
//! - **STH**: signed tree heads and log signature checks
//! - **Client**: the `LogClient` seam and its HTTP implementation
//! - **Witness**: signs anchor credentials, recording them in a log first
//!   when one is configured
//! - **Monitor**: periodically verifies that every monitored log only ever
//!   appends

pub mod client;
pub mod error;
pub mod merkle;
pub mod monitor;
pub mod sth;
pub mod store;
pub mod witness;

pub use client::{
    get_all_entries, AddVcResponse, HttpLogClient, HttpLogClientProvider, LeafEntry, LogClient, LogClientProvider,
    DEFAULT_HTTP_TIMEOUT, MAX_ENTRIES_PER_REQUEST,
};
pub use error::{Result, VctError};
pub use merkle::{verify_consistency, CompactRange, Hash};
pub use monitor::ConsistencyMonitor;
pub use sth::SignedTreeHead;
pub use store::{LogMonitor, LogMonitorStore};
pub use witness::{Ed25519Signer, Signer, VctWitness};
