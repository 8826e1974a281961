//! Anchor status store
//!
//! Tracks the witnessing state of every anchor as a set of tagged records:
//!
//! - `AnchorIndex` - base64url-encoded anchor ID
//! - `Status` - `in-process` or `completed`
//! - `ExpiryTime` - unix millis after which the record may be dropped
//! - `StatusCheckTime` - unix millis after which an `in-process` anchor is
//!   re-checked by [`AnchorStatusStore::check_in_process_anchors`]
//!
//! `completed` dominates: once written, every read returns `completed`
//! regardless of other records for the same anchor.

use chrono::Utc;
use orb_core::{AnchorIndexStatus, OrbError, PolicyHandler};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorageError;
use crate::store::{CompareOp, Query, Record, Store, Tag, EXPIRY_TIME_TAG};
use crate::{decode_tag_value, encode_tag_value};

pub const ANCHOR_INDEX_TAG: &str = "AnchorIndex";
pub const STATUS_TAG: &str = "Status";
pub const STATUS_CHECK_TIME_TAG: &str = "StatusCheckTime";

/// Added to the maximum witness delay to get the record lifespan
const EXPIRY_DELTA: Duration = Duration::from_secs(5 * 60);

/// Anchor status store configuration
#[derive(Clone, Debug)]
pub struct AnchorStatusConfig {
    /// Maximum time witnesses are given to respond
    pub max_witness_delay: Duration,

    /// Delay before an `in-process` anchor is picked up by the sweep
    pub check_status_after: Duration,
}

impl Default for AnchorStatusConfig {
    fn default() -> Self {
        Self {
            max_witness_delay: Duration::from_secs(10 * 60),
            check_status_after: Duration::from_secs(15),
        }
    }
}

impl AnchorStatusConfig {
    /// Lifespan of a status record
    pub fn status_lifespan(&self) -> Duration {
        self.max_witness_delay + EXPIRY_DELTA
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRecord {
    anchor_id: String,
    status: AnchorIndexStatus,
}

/// Anchor status store
pub struct AnchorStatusStore {
    store: Arc<dyn Store>,
    config: AnchorStatusConfig,
    policy_handler: RwLock<Option<Arc<dyn PolicyHandler>>>,
}

impl AnchorStatusStore {
    pub fn new(store: Arc<dyn Store>, config: AnchorStatusConfig) -> Self {
        Self {
            store,
            config,
            policy_handler: RwLock::new(None),
        }
    }

    /// Set the handler invoked by the in-process sweep.
    ///
    /// The proof handler depends on this store, so it is wired after
    /// construction.
    pub fn set_policy_handler(&self, handler: Arc<dyn PolicyHandler>) {
        *self.policy_handler.write() = Some(handler);
    }

    /// Record a status for an anchor
    pub async fn add_status(&self, anchor_id: &str, status: AnchorIndexStatus) -> Result<(), OrbError> {
        let encoded = encode_tag_value(anchor_id);
        let now = Utc::now().timestamp_millis();

        let mut tags = vec![
            Tag::new(ANCHOR_INDEX_TAG, &encoded),
            Tag::new(STATUS_TAG, status),
            Tag::new(EXPIRY_TIME_TAG, now + millis(self.config.status_lifespan())),
        ];

        if !status.is_completed() {
            tags.push(Tag::new(
                STATUS_CHECK_TIME_TAG,
                now + millis(self.config.check_status_after),
            ));
        }

        let value = serde_json::to_vec(&StatusRecord {
            anchor_id: anchor_id.to_string(),
            status,
        })
        .map_err(|e| OrbError::Internal(format!("marshal anchor status: {e}")))?;

        let key = uuid::Uuid::new_v4().to_string();

        self.store
            .put(&key, value, tags)
            .await
            .map_err(|e| OrbError::transient(format!("store anchor status [{anchor_id}]: {e}")))?;

        tracing::debug!(anchor_id = %anchor_id, status = %status, key = %key, "Anchor status stored");

        if status.is_completed() {
            if let Err(e) = self.delete_in_process(anchor_id, &encoded).await {
                tracing::warn!(
                    anchor_id = %anchor_id,
                    error = %e,
                    "Failed to delete in-process records for completed anchor"
                );
            }
        }

        Ok(())
    }

    /// Current status of an anchor
    pub async fn get_status(&self, anchor_id: &str) -> Result<AnchorIndexStatus, OrbError> {
        let records = self.query_anchor(&encode_tag_value(anchor_id)).await?;

        let mut status = None;
        for record in &records {
            let current = record_status(record).map_err(|e| {
                OrbError::transient(format!("anchor status record [{}]: {e}", record.key))
            })?;

            if current.is_completed() {
                return Ok(AnchorIndexStatus::Completed);
            }

            status = Some(current);
        }

        status.ok_or_else(|| OrbError::NotFound(format!("status not found for anchor [{anchor_id}]")))
    }

    /// Re-check every `in-process` anchor whose status-check time has passed.
    ///
    /// Failures for individual anchors are logged and do not stop the sweep.
    pub async fn check_in_process_anchors(&self) -> Result<(), OrbError> {
        let now = Utc::now().timestamp_millis();

        let records = self
            .store
            .query(&Query::compare(STATUS_CHECK_TIME_TAG, CompareOp::Le, now))
            .await
            .map_err(|e| OrbError::transient(format!("query status check records: {e}")))?;

        let encoded_ids: BTreeSet<String> = records
            .iter()
            .filter_map(|r| r.tag(ANCHOR_INDEX_TAG).map(str::to_string))
            .collect();

        if encoded_ids.is_empty() {
            return Ok(());
        }

        tracing::debug!(count = encoded_ids.len(), "Checking in-process anchors");

        let handler = self.policy_handler.read().clone();
        let Some(handler) = handler else {
            tracing::warn!("No policy handler set; skipping in-process anchor check");
            return Ok(());
        };

        for encoded in encoded_ids {
            let anchor_id = match decode_tag_value(&encoded) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(tag = %encoded, error = %e, "Invalid anchor index tag");
                    continue;
                }
            };

            match self.get_status(&anchor_id).await {
                Ok(AnchorIndexStatus::Completed) => {
                    tracing::debug!(anchor_id = %anchor_id, "Anchor already completed");
                    continue;
                }
                Ok(AnchorIndexStatus::InProcess) => {}
                Err(e) => {
                    tracing::warn!(anchor_id = %anchor_id, error = %e, "Failed to get anchor status");
                    continue;
                }
            }

            if let Err(e) = handler.check_policy(&anchor_id).await {
                tracing::warn!(anchor_id = %anchor_id, error = %e, "Policy check for in-process anchor failed");
            }
        }

        Ok(())
    }

    async fn query_anchor(&self, encoded: &str) -> Result<Vec<Record>, OrbError> {
        self.store
            .query(&Query::equals(ANCHOR_INDEX_TAG, encoded))
            .await
            .map_err(|e| OrbError::transient(format!("query anchor status: {e}")))
    }

    async fn delete_in_process(&self, anchor_id: &str, encoded: &str) -> Result<(), OrbError> {
        let records = self.query_anchor(encoded).await?;

        for record in records {
            if record.tag(STATUS_TAG) != Some(AnchorIndexStatus::InProcess.as_str()) {
                continue;
            }

            self.store
                .delete(&record.key)
                .await
                .map_err(|e| OrbError::transient(format!("delete in-process record [{}]: {e}", record.key)))?;

            tracing::debug!(anchor_id = %anchor_id, key = %record.key, "Deleted in-process record");
        }

        Ok(())
    }
}

fn record_status(record: &Record) -> Result<AnchorIndexStatus, StorageError> {
    let value: StatusRecord = serde_json::from_slice(&record.value)?;
    Ok(value.status)
}

pub(crate) fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemStore;
    use crate::store::Operation;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    const ANCHOR: &str = "hl:uEiAsiwjaXOYDmOHxmvDl3Mx0TfJ0uCar5YXqumjFJUNIBg";

    struct RecordingHandler {
        checked: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingHandler {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                checked: Mutex::new(Vec::new()),
                fail,
            })
        }
    }

    #[async_trait]
    impl PolicyHandler for RecordingHandler {
        async fn check_policy(&self, anchor_id: &str) -> Result<(), OrbError> {
            self.checked.lock().push(anchor_id.to_string());
            if self.fail {
                return Err(OrbError::transient("injected"));
            }
            Ok(())
        }
    }

    /// Store whose queries always fail
    struct FailingStore;

    #[async_trait]
    impl Store for FailingStore {
        async fn put(&self, _: &str, _: Vec<u8>, _: Vec<Tag>) -> crate::Result<()> {
            Err(StorageError::Backend("put error".into()))
        }
        async fn get(&self, key: &str) -> crate::Result<Vec<u8>> {
            Err(StorageError::NotFound(key.into()))
        }
        async fn get_tags(&self, key: &str) -> crate::Result<Vec<Tag>> {
            Err(StorageError::NotFound(key.into()))
        }
        async fn query(&self, _: &Query) -> crate::Result<Vec<Record>> {
            Err(StorageError::Backend("query error".into()))
        }
        async fn delete(&self, _: &str) -> crate::Result<()> {
            Err(StorageError::Backend("delete error".into()))
        }
        async fn batch(&self, _: Vec<Operation>) -> crate::Result<()> {
            Err(StorageError::Backend("batch error".into()))
        }
    }

    fn immediate_config() -> AnchorStatusConfig {
        AnchorStatusConfig {
            max_witness_delay: Duration::from_secs(60),
            check_status_after: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_add_and_get_status() {
        let mem = Arc::new(MemStore::new());
        let s = AnchorStatusStore::new(mem.clone(), AnchorStatusConfig::default());

        s.add_status(ANCHOR, AnchorIndexStatus::InProcess).await.unwrap();
        assert_eq!(s.get_status(ANCHOR).await.unwrap(), AnchorIndexStatus::InProcess);

        s.add_status(ANCHOR, AnchorIndexStatus::Completed).await.unwrap();
        assert_eq!(s.get_status(ANCHOR).await.unwrap(), AnchorIndexStatus::Completed);

        // The in-process record was removed; only the completed one remains
        assert_eq!(mem.len(), 1);
    }

    #[tokio::test]
    async fn test_completed_dominates_later_writes() {
        let s = AnchorStatusStore::new(Arc::new(MemStore::new()), AnchorStatusConfig::default());

        s.add_status(ANCHOR, AnchorIndexStatus::Completed).await.unwrap();
        s.add_status(ANCHOR, AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status(ANCHOR, AnchorIndexStatus::InProcess).await.unwrap();

        assert_eq!(s.get_status(ANCHOR).await.unwrap(), AnchorIndexStatus::Completed);
    }

    #[tokio::test]
    async fn test_record_tags() {
        let mem = Arc::new(MemStore::new());
        let s = AnchorStatusStore::new(mem.clone(), AnchorStatusConfig::default());

        s.add_status(ANCHOR, AnchorIndexStatus::InProcess).await.unwrap();

        let records = mem
            .query(&Query::equals(ANCHOR_INDEX_TAG, encode_tag_value(ANCHOR)))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);

        let record = &records[0];
        assert_eq!(record.tag(STATUS_TAG), Some("in-process"));
        assert!(record.tag(EXPIRY_TIME_TAG).is_some());
        assert!(record.tag(STATUS_CHECK_TIME_TAG).is_some());

        s.add_status(ANCHOR, AnchorIndexStatus::Completed).await.unwrap();
        let records = mem
            .query(&Query::equals(STATUS_TAG, "completed"))
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].tag(STATUS_CHECK_TIME_TAG).is_none());
    }

    #[tokio::test]
    async fn test_status_not_found() {
        let s = AnchorStatusStore::new(Arc::new(MemStore::new()), AnchorStatusConfig::default());

        let err = s.get_status(ANCHOR).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_storage_errors_are_transient() {
        let s = AnchorStatusStore::new(Arc::new(FailingStore), AnchorStatusConfig::default());

        assert!(s.get_status(ANCHOR).await.unwrap_err().is_transient());
        assert!(s
            .add_status(ANCHOR, AnchorIndexStatus::InProcess)
            .await
            .unwrap_err()
            .is_transient());
        assert!(s.check_in_process_anchors().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_transient() {
        let mem = Arc::new(MemStore::new());
        mem.put(
            "bad",
            b"not json".to_vec(),
            vec![Tag::new(ANCHOR_INDEX_TAG, encode_tag_value(ANCHOR))],
        )
        .await
        .unwrap();

        let s = AnchorStatusStore::new(mem, AnchorStatusConfig::default());
        assert!(s.get_status(ANCHOR).await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn test_check_in_process_anchors() {
        let s = AnchorStatusStore::new(Arc::new(MemStore::new()), immediate_config());
        let handler = RecordingHandler::new(false);
        s.set_policy_handler(handler.clone());

        s.add_status("anchor-1", AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status("anchor-2", AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status("anchor-2", AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status("anchor-3", AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status("anchor-3", AnchorIndexStatus::Completed).await.unwrap();

        s.check_in_process_anchors().await.unwrap();

        let mut checked = handler.checked.lock().clone();
        checked.sort();
        assert_eq!(checked, vec!["anchor-1".to_string(), "anchor-2".to_string()]);
    }

    #[tokio::test]
    async fn test_check_in_process_not_yet_due() {
        let s = AnchorStatusStore::new(Arc::new(MemStore::new()), AnchorStatusConfig::default());
        let handler = RecordingHandler::new(false);
        s.set_policy_handler(handler.clone());

        s.add_status(ANCHOR, AnchorIndexStatus::InProcess).await.unwrap();
        s.check_in_process_anchors().await.unwrap();

        assert!(handler.checked.lock().is_empty());
    }

    #[tokio::test]
    async fn test_check_in_process_handler_errors_do_not_halt() {
        let s = AnchorStatusStore::new(Arc::new(MemStore::new()), immediate_config());
        let handler = RecordingHandler::new(true);
        s.set_policy_handler(handler.clone());

        s.add_status("anchor-1", AnchorIndexStatus::InProcess).await.unwrap();
        s.add_status("anchor-2", AnchorIndexStatus::InProcess).await.unwrap();

        s.check_in_process_anchors().await.unwrap();
        assert_eq!(handler.checked.lock().len(), 2);
    }

    #[test]
    fn test_status_lifespan() {
        let config = AnchorStatusConfig {
            max_witness_delay: Duration::from_secs(60),
            check_status_after: Duration::from_secs(1),
        };
        assert_eq!(config.status_lifespan(), Duration::from_secs(6 * 60));
    }
}
