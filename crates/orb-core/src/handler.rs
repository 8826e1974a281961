//! Collaborator traits shared between the status store and the witness handlers

use crate::error::Result;
use async_trait::async_trait;

/// Forces re-evaluation of the witness policy for an anchor.
///
/// Invoked by the in-process anchor sweep when proofs may have arrived
/// out of band.
#[async_trait]
pub trait PolicyHandler: Send + Sync {
    async fn check_policy(&self, anchor_id: &str) -> Result<()>;
}
