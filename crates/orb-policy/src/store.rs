//! Witness policy persistence
//!
//! The raw DSL string is stored, never the parsed form. Every read parses it
//! again so that an update takes effect on the next evaluation.

use orb_core::OrbError;
use orb_storage::{Store, StorageError};
use std::sync::Arc;

use crate::config::WitnessPolicyConfig;

const POLICY_KEY: &str = "witness-policy";

/// Witness policy store
pub struct PolicyStore {
    store: Arc<dyn Store>,
}

impl PolicyStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Validate and persist a policy.
    ///
    /// An invalid policy is rejected with a bad-request error and the stored
    /// policy is left untouched.
    pub async fn put_policy(&self, policy: &str) -> Result<(), OrbError> {
        let config = WitnessPolicyConfig::parse(policy)?;

        self.store
            .put(POLICY_KEY, policy.as_bytes().to_vec(), Vec::new())
            .await
            .map_err(|e| OrbError::transient(format!("store witness policy: {e}")))?;

        tracing::info!(policy = %policy, config = %config, "Witness policy updated");
        Ok(())
    }

    /// The raw policy string; empty when no policy was ever stored
    pub async fn get_policy(&self) -> Result<String, OrbError> {
        match self.store.get(POLICY_KEY).await {
            Ok(bytes) => String::from_utf8(bytes)
                .map_err(|e| OrbError::Internal(format!("stored witness policy is not UTF-8: {e}"))),
            Err(StorageError::NotFound(_)) => Ok(String::new()),
            Err(e) => Err(OrbError::transient(format!("get witness policy: {e}"))),
        }
    }

    /// Parse the current policy
    pub async fn get_config(&self) -> Result<WitnessPolicyConfig, OrbError> {
        let policy = self.get_policy().await?;
        Ok(WitnessPolicyConfig::parse(&policy)?)
    }
}
