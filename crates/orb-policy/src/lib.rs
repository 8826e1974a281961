//! # Witness Policy
//!
//! Decides when an anchor credential has collected enough witness proofs.
//!
//! ## Policy DSL
//!
//! A policy is a whitespace-separated list of tokens:
//!
//! | Token | Effect |
//! |-------|--------|
//! | `OutOf(n,system)` / `OutOf(n,batch)` | at least `n` proofs from the role; `n = 0` also drops the percent requirement |
//! | `MinPercent(p,system)` / `MinPercent(p,batch)` | at least `p`% (0-100) of the role's witnesses |
//! | `AND` / `OR` | how the number and percent checks combine (last one wins) |
//! | `LogRequired` | at least one proof must come from a witness operating a log |
//!
//! The empty policy requires 100% of both roles.
//!
//! ```text
//! OutOf(2,system) AND MinPercent(50,batch) LogRequired
//! ```

pub mod config;
pub mod error;
pub mod evaluator;
pub mod policy;
pub mod selector;
pub mod store;

pub use config::{Operator, WitnessPolicyConfig};
pub use error::PolicyError;
pub use evaluator::Tally;
pub use policy::WitnessPolicy;
pub use store::PolicyStore;
