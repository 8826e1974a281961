//! Proof handler
//!
//! Stores proofs returned by witnesses and completes the anchor once the
//! witness policy is satisfied. Completion is serialized per anchor so an
//! anchor is published at most once even when proofs arrive concurrently.

use async_trait::async_trait;
use dashmap::DashMap;
use orb_core::{AnchorIndexStatus, OrbError, PolicyHandler, Result, WitnessProof};
use orb_policy::WitnessPolicy;
use orb_pubsub::{Message, MessageHandler};
use orb_storage::{AnchorStatusStore, WitnessProofStore};
use orb_vct::LogMonitorStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Topic carrying proofs received from witnesses
pub const WITNESS_PROOF_TOPIC: &str = "orb.witness.proof";

/// Publishes a witnessed anchor
#[async_trait]
pub trait AnchorPublisher: Send + Sync {
    async fn publish(&self, anchor_id: &str, proofs: &[WitnessProof]) -> Result<()>;
}

/// Proof received from a witness
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMessage {
    pub anchor_id: String,
    pub witness: String,
    pub proof: serde_json::Value,
}

/// Proof handler
pub struct ProofHandler {
    status: Arc<AnchorStatusStore>,
    proofs: Arc<WitnessProofStore>,
    policy: Arc<WitnessPolicy>,
    monitors: Arc<LogMonitorStore>,
    publisher: Arc<dyn AnchorPublisher>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ProofHandler {
    pub fn new(
        status: Arc<AnchorStatusStore>,
        proofs: Arc<WitnessProofStore>,
        policy: Arc<WitnessPolicy>,
        monitors: Arc<LogMonitorStore>,
        publisher: Arc<dyn AnchorPublisher>,
    ) -> Self {
        Self {
            status,
            proofs,
            policy,
            monitors,
            publisher,
            locks: DashMap::new(),
        }
    }

    /// Store the proof `witness` returned for `anchor_id` and re-evaluate
    /// the policy
    pub async fn handle_proof(&self, anchor_id: &str, witness: &str, proof: &[u8]) -> Result<()> {
        if self.status.get_status(anchor_id).await?.is_completed() {
            tracing::debug!(anchor_id = %anchor_id, witness = %witness, "Anchor already completed; ignoring proof");
            return Ok(());
        }

        let domain = proof_domain(proof)?;

        if let Err(e) = self.proofs.add_proof(anchor_id, witness, proof.to_vec()).await {
            // Completion removes the proof records; a proof racing it is late, not invalid
            if e.is_not_found() && self.status.get_status(anchor_id).await?.is_completed() {
                tracing::debug!(anchor_id = %anchor_id, witness = %witness, "Anchor completed while storing proof");
                return Ok(());
            }
            return Err(e);
        }

        // Only proofs from invited witnesses put their log under watch
        if let Some(log_url) = &domain {
            self.monitors.activate(log_url).await.map_err(OrbError::from)?;
        }

        tracing::debug!(anchor_id = %anchor_id, witness = %witness, log = ?domain, "Witness proof stored");

        self.check_policy(anchor_id).await
    }

    fn lock(&self, anchor_id: &str) -> AnchorLock<'_> {
        let lock = self.locks.entry(anchor_id.to_string()).or_default().clone();

        AnchorLock {
            locks: &self.locks,
            anchor_id: anchor_id.to_string(),
            lock,
        }
    }

    async fn complete(&self, anchor_id: &str) -> Result<()> {
        if self.status.get_status(anchor_id).await?.is_completed() {
            return Ok(());
        }

        let proofs = match self.proofs.get(anchor_id).await {
            Ok(proofs) => proofs,
            Err(OrbError::NotFound(_)) => Vec::new(),
            Err(e) => return Err(e),
        };

        if !self.policy.evaluate(&proofs).await? {
            tracing::debug!(anchor_id = %anchor_id, "Witness policy not yet satisfied");
            return Ok(());
        }

        let collected: Vec<WitnessProof> = proofs.into_iter().filter(WitnessProof::has_proof).collect();

        // Publish before marking completed so a failed publish is retried by the sweep
        self.publisher.publish(anchor_id, &collected).await?;
        self.status.add_status(anchor_id, AnchorIndexStatus::Completed).await?;

        if let Err(e) = self.proofs.delete(anchor_id).await {
            tracing::warn!(anchor_id = %anchor_id, error = %e, "Failed to delete witness proofs");
        }

        tracing::info!(anchor_id = %anchor_id, proofs = collected.len(), "Anchor witnessed");
        Ok(())
    }
}

/// Per-anchor completion lock.
///
/// Dropping the last holder removes the map entry, whatever the outcome of
/// the check.
struct AnchorLock<'a> {
    locks: &'a DashMap<String, Arc<Mutex<()>>>,
    anchor_id: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for AnchorLock<'_> {
    fn drop(&mut self) {
        // The map and this holder account for two references
        self.locks.remove_if(&self.anchor_id, |_, l| Arc::strong_count(l) <= 2);
    }
}

/// Validate a witness proof document and return its `domain`, if any
fn proof_domain(proof: &[u8]) -> Result<Option<String>> {
    let value: serde_json::Value = serde_json::from_slice(proof)?;

    let proof = value
        .get("proof")
        .filter(|p| p.is_object())
        .ok_or_else(|| OrbError::bad_request("witness proof has no proof object"))?;

    Ok(proof.get("domain").and_then(|d| d.as_str()).map(str::to_string))
}

#[async_trait]
impl PolicyHandler for ProofHandler {
    async fn check_policy(&self, anchor_id: &str) -> Result<()> {
        let entry = self.lock(anchor_id);
        let _guard = entry.lock.lock().await;

        self.complete(anchor_id).await
    }
}

#[async_trait]
impl MessageHandler for ProofHandler {
    async fn handle(&self, msg: &Message) -> Result<()> {
        let proof: ProofMessage = serde_json::from_slice(&msg.payload)?;
        let bytes = serde_json::to_vec(&proof.proof)?;

        self.handle_proof(&proof.anchor_id, &proof.witness, &bytes).await
    }
}
