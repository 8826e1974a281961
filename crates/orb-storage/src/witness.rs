//! Witness proof store
//!
//! One record per invited witness of an anchor. The record is written with
//! an empty proof when the offer goes out and updated when the witness
//! responds. Records carry the same `ExpiryTime` as the anchor's status
//! records so an anchor that never reaches a status write does not leak.

use chrono::Utc;
use orb_core::{OrbError, Witness, WitnessProof};
use std::sync::Arc;
use std::time::Duration;

use crate::anchor_status::{millis, AnchorStatusConfig};
use crate::encode_tag_value;
use crate::store::{Operation, Query, Record, Store, Tag, EXPIRY_TIME_TAG};

pub const WITNESS_ANCHOR_TAG: &str = "WitnessAnchor";

/// Witness proof store
pub struct WitnessProofStore {
    store: Arc<dyn Store>,
    lifespan: Duration,
}

impl WitnessProofStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self::with_lifespan(store, AnchorStatusConfig::default().status_lifespan())
    }

    /// Records expire `lifespan` after they are written
    pub fn with_lifespan(store: Arc<dyn Store>, lifespan: Duration) -> Self {
        Self { store, lifespan }
    }

    /// Record the witnesses invited for an anchor
    pub async fn put_witnesses(&self, anchor_id: &str, witnesses: &[Witness]) -> Result<(), OrbError> {
        let encoded = encode_tag_value(anchor_id);
        let expiry = Utc::now().timestamp_millis() + millis(self.lifespan);

        let mut operations = Vec::with_capacity(witnesses.len());
        for witness in witnesses {
            let value = serde_json::to_vec(&WitnessProof::pending(witness))
                .map_err(|e| OrbError::Internal(format!("marshal witness: {e}")))?;

            operations.push(Operation::Put {
                key: uuid::Uuid::new_v4().to_string(),
                value,
                tags: vec![Tag::new(WITNESS_ANCHOR_TAG, &encoded), Tag::new(EXPIRY_TIME_TAG, expiry)],
            });
        }

        self.store
            .batch(operations)
            .await
            .map_err(|e| OrbError::transient(format!("store witnesses for anchor [{anchor_id}]: {e}")))?;

        tracing::debug!(anchor_id = %anchor_id, count = witnesses.len(), "Witnesses stored");
        Ok(())
    }

    /// Attach a proof to the invited witness identified by `witness_uri`.
    ///
    /// Fails with `NotFound` if that witness was never invited for the anchor.
    pub async fn add_proof(&self, anchor_id: &str, witness_uri: &str, proof: Vec<u8>) -> Result<(), OrbError> {
        let records = self.query(anchor_id).await?;

        let mut updated = 0;
        for record in records {
            let mut wp = match decode(&record) {
                Ok(wp) => wp,
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping corrupt witness record");
                    continue;
                }
            };

            if wp.uri != witness_uri {
                continue;
            }

            wp.proof = Some(proof.clone());
            let value = serde_json::to_vec(&wp)
                .map_err(|e| OrbError::Internal(format!("marshal witness proof: {e}")))?;

            self.store
                .put(&record.key, value, record.tags.clone())
                .await
                .map_err(|e| OrbError::transient(format!("store witness proof: {e}")))?;

            updated += 1;
        }

        if updated == 0 {
            return Err(OrbError::NotFound(format!(
                "witness [{witness_uri}] not found for anchor [{anchor_id}]"
            )));
        }

        tracing::debug!(anchor_id = %anchor_id, witness = %witness_uri, "Witness proof stored");
        Ok(())
    }

    /// Every witness record for an anchor, with or without proof
    pub async fn get(&self, anchor_id: &str) -> Result<Vec<WitnessProof>, OrbError> {
        let records = self.query(anchor_id).await?;
        if records.is_empty() {
            return Err(OrbError::NotFound(format!("witnesses not found for anchor [{anchor_id}]")));
        }

        let mut proofs = Vec::with_capacity(records.len());
        for record in &records {
            proofs.push(decode(record).map_err(|e| {
                OrbError::transient(format!("witness record [{}]: {e}", record.key))
            })?);
        }

        Ok(proofs)
    }

    /// Drop every witness record for an anchor
    pub async fn delete(&self, anchor_id: &str) -> Result<(), OrbError> {
        let operations = self
            .query(anchor_id)
            .await?
            .into_iter()
            .map(|r| Operation::Delete { key: r.key })
            .collect();

        self.store
            .batch(operations)
            .await
            .map_err(|e| OrbError::transient(format!("delete witnesses for anchor [{anchor_id}]: {e}")))
    }

    async fn query(&self, anchor_id: &str) -> Result<Vec<Record>, OrbError> {
        self.store
            .query(&Query::equals(WITNESS_ANCHOR_TAG, encode_tag_value(anchor_id)))
            .await
            .map_err(|e| OrbError::transient(format!("query witnesses for anchor [{anchor_id}]: {e}")))
    }
}

fn decode(record: &Record) -> Result<WitnessProof, serde_json::Error> {
    serde_json::from_slice(&record.value)
}
