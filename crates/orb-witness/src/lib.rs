//! # Orb Witness
//!
//! Witnessing of anchor credentials.
//!
//! ```text
//! anchor ──► WitnessHandler ──► select (policy, accept list)
//!                 │                    │
//!                 │          put_witnesses + in-process status
//!                 ▼
//!        orb.witness.offer ──► OfferHandler ──► Outbox
//!
//! proof ──► ProofHandler ──► add_proof ──► evaluate policy ──► publish + completed
//! ```
//!
//! The proof handler is also the anchor status store's policy handler, so
//! anchors whose proofs arrived while the node was busy are completed by the
//! periodic in-process sweep.

pub mod accept_list;
pub mod handler;
pub mod proof;

pub use accept_list::{AcceptList, AcceptListManager, StoreAcceptListManager, FOLLOW_TYPE, INVITE_WITNESS_TYPE};
pub use handler::{Offer, OfferHandler, Outbox, WitnessHandler, WitnessHandlerConfig, WitnessProvider, WITNESS_OFFER_TOPIC};
pub use proof::{AnchorPublisher, ProofHandler, ProofMessage, WITNESS_PROOF_TOPIC};
