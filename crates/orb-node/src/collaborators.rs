//! Node-side implementations of the witness collaborators

use async_trait::async_trait;
use orb_core::{OrbError, Result, Witness, WitnessProof};
use orb_pubsub::{MemPubSub, Message};
use orb_vct::VctWitness;
use orb_witness::{AnchorPublisher, Offer, Outbox, ProofMessage, WitnessProvider, WITNESS_PROOF_TOPIC};
use std::sync::Arc;

/// Outbox that witnesses offers addressed to this node itself.
///
/// The proof is published on the proof topic exactly as a remote proof
/// would be. Offers for remote witnesses need a federation transport and
/// are only logged.
pub struct LocalOutbox {
    service_url: String,
    witness: Arc<VctWitness>,
    pubsub: Arc<MemPubSub>,
}

impl LocalOutbox {
    pub fn new(service_url: impl Into<String>, witness: Arc<VctWitness>, pubsub: Arc<MemPubSub>) -> Self {
        Self {
            service_url: service_url.into(),
            witness,
            pubsub,
        }
    }
}

#[async_trait]
impl Outbox for LocalOutbox {
    async fn post(&self, offer: &Offer) -> Result<()> {
        if offer.witness != self.service_url {
            tracing::info!(
                anchor_id = %offer.anchor_id,
                witness = %offer.witness,
                "No transport for remote witness, offer dropped"
            );
            return Ok(());
        }

        let credential = serde_json::to_vec(&offer.credential)?;
        let proof = self.witness.witness(&credential).await?;

        let message = ProofMessage {
            anchor_id: offer.anchor_id.clone(),
            witness: self.service_url.clone(),
            proof: serde_json::from_slice(&proof)?,
        };

        let payload = serde_json::to_vec(&message).map_err(|e| OrbError::Internal(format!("marshal proof: {e}")))?;

        self.pubsub
            .publish(WITNESS_PROOF_TOPIC, vec![Message::with_payload(payload)])
            .await
            .map_err(OrbError::from)?;

        tracing::debug!(anchor_id = %offer.anchor_id, "Anchor witnessed by local node");
        Ok(())
    }
}

/// Fixed set of system witnesses from the node configuration
pub struct StaticWitnessProvider {
    witnesses: Vec<Witness>,
}

impl StaticWitnessProvider {
    pub fn new(witnesses: Vec<Witness>) -> Self {
        Self { witnesses }
    }
}

#[async_trait]
impl WitnessProvider for StaticWitnessProvider {
    async fn system_witnesses(&self) -> Result<Vec<Witness>> {
        Ok(self.witnesses.clone())
    }
}

/// Publisher that records completed anchors in the log
#[derive(Default)]
pub struct LoggingAnchorPublisher;

#[async_trait]
impl AnchorPublisher for LoggingAnchorPublisher {
    async fn publish(&self, anchor_id: &str, proofs: &[WitnessProof]) -> Result<()> {
        let witnessed = proofs.iter().filter(|p| p.has_proof()).count();
        tracing::info!(anchor_id = %anchor_id, witnessed, invited = proofs.len(), "Anchor witnessed");
        Ok(())
    }
}
