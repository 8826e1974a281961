//! Witness handler
//!
//! Starts witnessing of an anchor: collects candidate witnesses, applies
//! the accept list and the policy's selection, records the invited
//! witnesses and publishes one offer per selected witness. Offers are
//! delivered to the outbox by [`OfferHandler`] through the dispatcher, so
//! transient outbox failures are redelivered.

use async_trait::async_trait;
use orb_core::{AnchorIndexStatus, OrbError, Result, Witness, WitnessType};
use orb_policy::WitnessPolicy;
use orb_pubsub::{MemPubSub, Message, MessageHandler};
use orb_storage::{AnchorStatusStore, WitnessProofStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

use crate::accept_list::{AcceptListManager, INVITE_WITNESS_TYPE};
use crate::proof::AnchorPublisher;

/// Topic carrying offers to the outbox
pub const WITNESS_OFFER_TOPIC: &str = "orb.witness.offer";

/// Request to witness an anchor credential
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub anchor_id: String,
    /// Witness the offer is addressed to
    pub witness: String,
    pub credential: serde_json::Value,
}

/// Sends offers to remote witnesses
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn post(&self, offer: &Offer) -> Result<()>;
}

/// Supplies the system witnesses
#[async_trait]
pub trait WitnessProvider: Send + Sync {
    async fn system_witnesses(&self) -> Result<Vec<Witness>>;
}

/// Witness handler configuration
#[derive(Clone, Debug, Default)]
pub struct WitnessHandlerConfig {
    /// Only invite witnesses on the `invite-witness` accept list
    pub enforce_accept_list: bool,
}

/// Witness handler
pub struct WitnessHandler {
    config: WitnessHandlerConfig,
    policy: Arc<WitnessPolicy>,
    witnesses: Arc<dyn WitnessProvider>,
    accept_list: Arc<dyn AcceptListManager>,
    proofs: Arc<WitnessProofStore>,
    status: Arc<AnchorStatusStore>,
    pubsub: Arc<MemPubSub>,
    publisher: Arc<dyn AnchorPublisher>,
}

impl WitnessHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: WitnessHandlerConfig,
        policy: Arc<WitnessPolicy>,
        witnesses: Arc<dyn WitnessProvider>,
        accept_list: Arc<dyn AcceptListManager>,
        proofs: Arc<WitnessProofStore>,
        status: Arc<AnchorStatusStore>,
        pubsub: Arc<MemPubSub>,
        publisher: Arc<dyn AnchorPublisher>,
    ) -> Self {
        Self {
            config,
            policy,
            witnesses,
            accept_list,
            proofs,
            status,
            pubsub,
            publisher,
        }
    }

    /// Start witnessing `anchor_id`.
    ///
    /// `batch_witnesses` are the servers named by the batch; they take
    /// precedence over a system witness with the same URI.
    pub async fn witness_anchor(
        &self,
        anchor_id: &str,
        credential: &[u8],
        batch_witnesses: &[String],
    ) -> Result<Vec<Witness>> {
        let credential: serde_json::Value = serde_json::from_slice(credential)?;

        let candidates = self.candidates(batch_witnesses).await?;
        let selected = self.policy.select(candidates).await?;

        if selected.is_empty() {
            return self.complete_without_witnesses(anchor_id).await.map(|()| selected);
        }

        self.proofs.put_witnesses(anchor_id, &selected).await?;
        self.status.add_status(anchor_id, AnchorIndexStatus::InProcess).await?;

        let messages = selected
            .iter()
            .map(|w| {
                let offer = Offer {
                    anchor_id: anchor_id.to_string(),
                    witness: w.uri.clone(),
                    credential: credential.clone(),
                };
                serde_json::to_vec(&offer)
                    .map(Message::with_payload)
                    .map_err(|e| OrbError::Internal(format!("marshal offer: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        self.pubsub
            .publish(WITNESS_OFFER_TOPIC, messages)
            .await
            .map_err(OrbError::from)?;

        tracing::info!(anchor_id = %anchor_id, witnesses = selected.len(), "Witness offers published");
        Ok(selected)
    }

    async fn candidates(&self, batch_witnesses: &[String]) -> Result<Vec<Witness>> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for uri in batch_witnesses {
            if seen.insert(uri.clone()) {
                candidates.push(Witness::new(WitnessType::Batch, uri.clone(), false));
            }
        }

        for witness in self.witnesses.system_witnesses().await? {
            if seen.insert(witness.uri.clone()) {
                candidates.push(Witness {
                    witness_type: WitnessType::System,
                    ..witness
                });
            }
        }

        if !self.config.enforce_accept_list {
            return Ok(candidates);
        }

        let allowed: HashSet<String> = self.accept_list.get(INVITE_WITNESS_TYPE).await?.into_iter().collect();

        Ok(candidates
            .into_iter()
            .filter(|w| {
                let ok = allowed.contains(&w.uri);
                if !ok {
                    tracing::debug!(witness = %w.uri, "Witness not on accept list; skipping");
                }
                ok
            })
            .collect())
    }

    async fn complete_without_witnesses(&self, anchor_id: &str) -> Result<()> {
        if !self.policy.evaluate(&[]).await? {
            return Err(OrbError::bad_request(format!(
                "no witnesses available to satisfy the witness policy for anchor [{anchor_id}]"
            )));
        }

        self.publisher.publish(anchor_id, &[]).await?;
        self.status.add_status(anchor_id, AnchorIndexStatus::Completed).await?;

        tracing::info!(anchor_id = %anchor_id, "Anchor completed without witnesses");
        Ok(())
    }
}

/// Delivers offers from [`WITNESS_OFFER_TOPIC`] to the outbox
pub struct OfferHandler {
    outbox: Arc<dyn Outbox>,
}

impl OfferHandler {
    pub fn new(outbox: Arc<dyn Outbox>) -> Self {
        Self { outbox }
    }
}

#[async_trait]
impl MessageHandler for OfferHandler {
    async fn handle(&self, msg: &Message) -> Result<()> {
        let offer: Offer = serde_json::from_slice(&msg.payload)?;

        self.outbox.post(&offer).await?;

        tracing::debug!(anchor_id = %offer.anchor_id, witness = %offer.witness, "Offer posted");
        Ok(())
    }
}
