//! Witness policy backed by the policy store

use orb_core::{OrbError, Witness, WitnessProof};
use std::sync::Arc;

use crate::evaluator::Tally;
use crate::store::PolicyStore;

/// Evaluates and selects witnesses against the currently stored policy
pub struct WitnessPolicy {
    store: Arc<PolicyStore>,
}

impl WitnessPolicy {
    pub fn new(store: Arc<PolicyStore>) -> Self {
        Self { store }
    }

    /// Check whether the collected proofs satisfy the policy
    pub async fn evaluate(&self, proofs: &[WitnessProof]) -> Result<bool, OrbError> {
        let config = self.store.get_config().await?;
        Ok(config.evaluate(&Tally::from_proofs(proofs)))
    }

    /// Select the witnesses that receive the offer
    pub async fn select(&self, candidates: Vec<Witness>) -> Result<Vec<Witness>, OrbError> {
        let config = self.store.get_config().await?;
        Ok(config.select(candidates))
    }
}
