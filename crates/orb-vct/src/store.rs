//! Log monitor records
//!
//! One record per monitored log, keyed by the log URL and tagged with its
//! `Status` so the monitor can list the active ones.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use orb_storage::{Query, Store, StorageError, Tag};

use crate::error::{Result, VctError};
use crate::sth::SignedTreeHead;

pub const STATUS_TAG: &str = "Status";
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";

/// Monitoring state of one log
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogMonitor {
    pub log_url: String,
    pub active: bool,
    /// Set while a consistency check for this log is running
    #[serde(default)]
    pub processing: bool,
    /// Last verified tree head
    #[serde(default)]
    pub sth: Option<SignedTreeHead>,
    #[serde(default)]
    pub public_key: Option<Vec<u8>>,
}

impl LogMonitor {
    pub fn new(log_url: impl Into<String>) -> Self {
        Self {
            log_url: log_url.into(),
            active: true,
            processing: false,
            sth: None,
            public_key: None,
        }
    }

    fn status(&self) -> &'static str {
        if self.active {
            STATUS_ACTIVE
        } else {
            STATUS_INACTIVE
        }
    }
}

/// Log monitor store
pub struct LogMonitorStore {
    store: Arc<dyn Store>,
}

impl LogMonitorStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Start monitoring `log_url`, keeping any previously verified state
    pub async fn activate(&self, log_url: &str) -> Result<()> {
        let monitor = match self.get(log_url).await {
            Ok(mut existing) => {
                if existing.active {
                    return Ok(());
                }
                existing.active = true;
                existing
            }
            Err(VctError::MonitorNotFound(_)) => LogMonitor::new(log_url),
            Err(e) => return Err(e),
        };

        self.update(&monitor).await?;

        tracing::info!(log = %log_url, "Log monitoring activated");
        Ok(())
    }

    /// Stop monitoring `log_url`
    pub async fn deactivate(&self, log_url: &str) -> Result<()> {
        let mut monitor = self.get(log_url).await?;
        monitor.active = false;

        self.update(&monitor).await?;

        tracing::info!(log = %log_url, "Log monitoring deactivated");
        Ok(())
    }

    pub async fn get(&self, log_url: &str) -> Result<LogMonitor> {
        let bytes = self.store.get(log_url).await?;

        serde_json::from_slice(&bytes)
            .map_err(|e| VctError::Storage(format!("decode log monitor [{log_url}]: {e}")))
    }

    pub async fn update(&self, monitor: &LogMonitor) -> Result<()> {
        let value = serde_json::to_vec(monitor).map_err(StorageError::from)?;

        self.store
            .put(&monitor.log_url, value, vec![Tag::new(STATUS_TAG, monitor.status())])
            .await?;

        Ok(())
    }

    /// Active monitors. Corrupt records are skipped.
    pub async fn get_active(&self) -> Result<Vec<LogMonitor>> {
        let records = self.store.query(&Query::equals(STATUS_TAG, STATUS_ACTIVE)).await?;

        Ok(records
            .into_iter()
            .filter_map(|record| match serde_json::from_slice::<LogMonitor>(&record.value) {
                Ok(monitor) => Some(monitor),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping corrupt log monitor record");
                    None
                }
            })
            .collect())
    }
}
