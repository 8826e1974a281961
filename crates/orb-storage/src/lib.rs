//! # Orb Storage
//!
//! Tag-indexed key-value storage used by the witnessing subsystem.
//!
//! ## Storage Layout
//!
//! - `store` - the `Store` trait, records, tags and tag queries
//! - `mem` - in-memory provider with `ExpiryTime` based expiry
//! - `anchor_status` - per-anchor `in-process`/`completed` records
//! - `witness` - invited witnesses and the proofs they returned

pub mod anchor_status;
pub mod error;
pub mod mem;
pub mod store;
pub mod witness;

pub use anchor_status::{AnchorStatusConfig, AnchorStatusStore};
pub use error::{Result, StorageError};
pub use mem::{ExpiryService, MemStore, MemStoreProvider};
pub use store::{CompareOp, Operation, Query, Record, Store, Tag, EXPIRY_TIME_TAG};
pub use witness::WitnessProofStore;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encode a value for use as a tag value (tag values must be URL-safe)
pub fn encode_tag_value(value: &str) -> String {
    URL_SAFE_NO_PAD.encode(value.as_bytes())
}

/// Decode a tag value produced by [`encode_tag_value`]
pub fn decode_tag_value(value: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| StorageError::Serialization(format!("decode tag value: {e}")))?;

    String::from_utf8(bytes).map_err(|e| StorageError::Serialization(format!("decode tag value: {e}")))
}
