//! Log consistency monitor
//!
//! Every active log is checked independently. A check marks the monitor as
//! processing before any network I/O, verifies the log's current tree head
//! against the last verified one and persists the result. A failed check
//! leaves the last verified tree head in place, so the next cycle retries
//! from known-good state.

use std::sync::Arc;

use crate::client::{get_all_entries, LogClient, LogClientProvider};
use crate::error::{Result, VctError};
use crate::merkle::{leaf_hash, verify_consistency, CompactRange};
use crate::sth::SignedTreeHead;
use crate::store::{LogMonitor, LogMonitorStore};

/// Consistency monitor
#[derive(Clone)]
pub struct ConsistencyMonitor {
    store: Arc<LogMonitorStore>,
    clients: Arc<dyn LogClientProvider>,
}

impl ConsistencyMonitor {
    pub fn new(store: Arc<LogMonitorStore>, clients: Arc<dyn LogClientProvider>) -> Self {
        Self { store, clients }
    }

    /// Clear `processing` flags left behind by an interrupted run
    pub async fn recover(&self) -> Result<()> {
        for mut monitor in self.store.get_active().await? {
            if monitor.processing {
                tracing::warn!(log = %monitor.log_url, "Clearing processing flag of interrupted check");
                monitor.processing = false;
                self.store.update(&monitor).await?;
            }
        }
        Ok(())
    }

    /// Check every active log concurrently. Failures of individual logs are
    /// logged and do not affect the others.
    pub async fn monitor_logs(&self) -> Result<()> {
        let monitors = self.store.get_active().await?;

        let tasks = monitors.into_iter().map(|monitor| {
            let this = self.clone();
            tokio::spawn(async move {
                let log_url = monitor.log_url.clone();
                if let Err(e) = this.process_log(monitor).await {
                    tracing::warn!(log = %log_url, error = %e, "Log consistency check failed");
                }
            })
        });

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                tracing::error!(error = %e, "Log consistency task panicked");
            }
        }

        Ok(())
    }

    /// Check one log and persist the outcome
    pub async fn process_log(&self, mut monitor: LogMonitor) -> Result<()> {
        if monitor.processing {
            tracing::debug!(log = %monitor.log_url, "Log check already in progress; skipping");
            return Ok(());
        }

        monitor.processing = true;
        self.store.update(&monitor).await?;

        match self.check(&monitor).await {
            Ok((sth, public_key)) => {
                tracing::debug!(
                    log = %monitor.log_url,
                    tree_size = sth.tree_size,
                    "Log consistency verified"
                );

                monitor.sth = Some(sth);
                monitor.public_key = Some(public_key);
                monitor.processing = false;
                self.store.update(&monitor).await
            }
            Err(e) => {
                monitor.processing = false;
                if let Err(update_err) = self.store.update(&monitor).await {
                    tracing::error!(
                        log = %monitor.log_url,
                        error = %update_err,
                        "Failed to reset processing flag"
                    );
                }
                Err(e)
            }
        }
    }

    async fn check(&self, monitor: &LogMonitor) -> Result<(SignedTreeHead, Vec<u8>)> {
        let client = self.clients.client(&monitor.log_url)?;

        let sth = client.get_sth().await?;
        let public_key = self.verify_sth(client.as_ref(), monitor, &sth).await?;

        match &monitor.sth {
            None if sth.tree_size == 0 => {}
            None => verify_root(client.as_ref(), &sth).await?,
            Some(prev) if prev.tree_size == sth.tree_size => {
                if prev.sha256_root_hash != sth.sha256_root_hash {
                    return Err(VctError::Consistency(format!(
                        "root hash changed at tree size {}",
                        sth.tree_size
                    )));
                }
            }
            Some(prev) => verify_extension(client.as_ref(), prev, &sth).await?,
        }

        Ok((sth, public_key))
    }

    /// Verify the tree head signature, reusing the stored key when there is
    /// one. The key is refreshed once if the stored one no longer verifies.
    async fn verify_sth(&self, client: &dyn LogClient, monitor: &LogMonitor, sth: &SignedTreeHead) -> Result<Vec<u8>> {
        if let Some(key) = &monitor.public_key {
            if sth.verify(key).is_ok() {
                return Ok(key.clone());
            }
            tracing::info!(log = %monitor.log_url, "Stored log key does not verify tree head; refreshing");
        }

        let key = client.get_public_key().await?;
        sth.verify(&key)?;
        Ok(key)
    }
}

/// First sight of a log: recompute the root from every entry
async fn verify_root(client: &dyn LogClient, sth: &SignedTreeHead) -> Result<()> {
    let entries = get_all_entries(client, sth.tree_size).await?;

    let mut range = CompactRange::new();
    for entry in &entries {
        range.append(leaf_hash(&entry.leaf_data()?));
    }

    let expected = sth.root_hash()?;
    if range.root() != expected {
        return Err(VctError::Consistency(format!(
            "computed root {} does not match tree head root {} at size {}",
            hex::encode(range.root()),
            hex::encode(expected),
            sth.tree_size
        )));
    }

    Ok(())
}

async fn verify_extension(client: &dyn LogClient, prev: &SignedTreeHead, sth: &SignedTreeHead) -> Result<()> {
    if sth.tree_size < prev.tree_size {
        return Err(VctError::Consistency(format!(
            "tree shrank from {} to {}",
            prev.tree_size, sth.tree_size
        )));
    }

    if prev.tree_size == 0 {
        return Ok(());
    }

    let proof = client.get_sth_consistency(prev.tree_size, sth.tree_size).await?;

    verify_consistency(
        prev.tree_size,
        sth.tree_size,
        &prev.root_hash()?,
        &sth.root_hash()?,
        &proof,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AddVcResponse, LeafEntry};
    use crate::merkle::{consistency_proof, root_from_leaf_hashes, Hash};
    use crate::sth::tests::signed_sth;
    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use ed25519_dalek::SigningKey;
    use orb_storage::MemStore;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// In-memory log that records the calls it receives
    struct MockLog {
        key: Mutex<SigningKey>,
        leaves: Mutex<Vec<Vec<u8>>>,
        calls: Mutex<Vec<&'static str>>,
        down: Mutex<bool>,
        /// Entry served in place of the signed one
        tampered: Mutex<Option<(usize, Vec<u8>)>>,
    }

    impl MockLog {
        fn new(size: usize) -> Arc<Self> {
            let log = Arc::new(Self {
                key: Mutex::new(SigningKey::generate(&mut rand::rngs::OsRng)),
                leaves: Mutex::new(Vec::new()),
                calls: Mutex::new(Vec::new()),
                down: Mutex::new(false),
                tampered: Mutex::new(None),
            });
            log.append(size);
            log
        }

        fn append(&self, n: usize) {
            let mut leaves = self.leaves.lock();
            let start = leaves.len();
            leaves.extend((start..start + n).map(|i| format!("vc-{i}").into_bytes()));
        }

        fn leaf_hashes(&self) -> Vec<Hash> {
            self.leaves.lock().iter().map(|l| leaf_hash(l)).collect()
        }

        fn calls(&self) -> Vec<&'static str> {
            self.calls.lock().clone()
        }

        fn record(&self, call: &'static str) -> Result<()> {
            self.calls.lock().push(call);
            if *self.down.lock() {
                return Err(VctError::Unavailable("connection refused".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl LogClient for MockLog {
        async fn get_sth(&self) -> Result<SignedTreeHead> {
            self.record("get-sth")?;
            let hashes = self.leaf_hashes();
            Ok(signed_sth(
                &self.key.lock(),
                hashes.len() as u64,
                &root_from_leaf_hashes(&hashes),
                1_617_000_000_000,
            ))
        }

        async fn get_sth_consistency(&self, first: u64, second: u64) -> Result<Vec<Hash>> {
            self.record("get-sth-consistency")?;
            let hashes = self.leaf_hashes();
            Ok(consistency_proof(&hashes[..second as usize], first as usize))
        }

        async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LeafEntry>> {
            self.record("get-entries")?;
            let leaves = self.leaves.lock();
            let tampered = self.tampered.lock();
            Ok((start as usize..=end as usize)
                .map(|i| {
                    let leaf = match tampered.as_ref() {
                        Some((index, data)) if *index == i => data,
                        _ => &leaves[i],
                    };
                    LeafEntry {
                        leaf_input: STANDARD.encode(leaf),
                        extra_data: String::new(),
                    }
                })
                .collect())
        }

        async fn get_public_key(&self) -> Result<Vec<u8>> {
            self.record("webfinger")?;
            Ok(self.key.lock().verifying_key().to_bytes().to_vec())
        }

        async fn add_vc(&self, _: &[u8]) -> Result<AddVcResponse> {
            unreachable!()
        }
    }

    struct MockProvider {
        logs: HashMap<String, Arc<MockLog>>,
    }

    impl LogClientProvider for MockProvider {
        fn client(&self, log_url: &str) -> Result<Arc<dyn LogClient>> {
            self.logs
                .get(log_url)
                .cloned()
                .map(|log| log as Arc<dyn LogClient>)
                .ok_or_else(|| VctError::InvalidEndpoint {
                    endpoint: log_url.to_string(),
                    reason: "unknown".into(),
                })
        }
    }

    const LOG: &str = "https://vct.example.com/maple2020";

    async fn setup(logs: Vec<(&str, Arc<MockLog>)>) -> (Arc<LogMonitorStore>, ConsistencyMonitor) {
        let store = Arc::new(LogMonitorStore::new(Arc::new(MemStore::new())));
        for (url, _) in &logs {
            store.activate(url).await.unwrap();
        }

        let provider = MockProvider {
            logs: logs.into_iter().map(|(u, l)| (u.to_string(), l)).collect(),
        };

        let monitor = ConsistencyMonitor::new(store.clone(), Arc::new(provider));
        (store, monitor)
    }

    #[tokio::test]
    async fn test_empty_log_is_trivially_consistent() {
        let log = MockLog::new(0);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();

        let state = store.get(LOG).await.unwrap();
        assert_eq!(state.sth.unwrap().tree_size, 0);
        assert!(!state.processing);
        assert_eq!(log.calls(), vec!["get-sth", "webfinger"]);
    }

    #[tokio::test]
    async fn test_first_check_recomputes_root() {
        let log = MockLog::new(1500);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();

        let state = store.get(LOG).await.unwrap();
        assert_eq!(state.sth.unwrap().tree_size, 1500);
        assert!(state.public_key.is_some());
        assert_eq!(
            log.calls(),
            vec!["get-sth", "webfinger", "get-entries", "get-entries"]
        );
    }

    #[tokio::test]
    async fn test_first_check_rejects_tampered_entries() {
        let log = MockLog::new(8);
        *log.tampered.lock() = Some((3, b"forged".to_vec()));
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        let state = store.get(LOG).await.unwrap();
        let err = monitor.process_log(state).await.unwrap_err();
        assert!(matches!(err, VctError::Consistency(_)));

        let state = store.get(LOG).await.unwrap();
        assert!(state.sth.is_none());
        assert!(state.public_key.is_none());
        assert!(!state.processing);

        // The next cycle starts over from the entries
        *log.tampered.lock() = None;
        monitor.monitor_logs().await.unwrap();
        assert_eq!(store.get(LOG).await.unwrap().sth.unwrap().tree_size, 8);
    }

    #[tokio::test]
    async fn test_unchanged_tree_only_fetches_sth() {
        let log = MockLog::new(10);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();
        log.calls.lock().clear();

        monitor.monitor_logs().await.unwrap();

        assert_eq!(log.calls(), vec!["get-sth"]);
        assert_eq!(store.get(LOG).await.unwrap().sth.unwrap().tree_size, 10);
    }

    #[tokio::test]
    async fn test_grown_tree_verifies_consistency_proof() {
        let log = MockLog::new(5);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();
        log.append(7);
        log.calls.lock().clear();

        monitor.monitor_logs().await.unwrap();

        assert_eq!(log.calls(), vec!["get-sth", "get-sth-consistency"]);
        assert_eq!(store.get(LOG).await.unwrap().sth.unwrap().tree_size, 12);
    }

    #[tokio::test]
    async fn test_rewritten_history_is_rejected() {
        let log = MockLog::new(5);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();

        log.leaves.lock()[2] = b"rewritten".to_vec();
        log.append(3);

        let state = store.get(LOG).await.unwrap();
        let err = monitor.process_log(state).await.unwrap_err();
        assert!(matches!(err, VctError::Consistency(_)));

        let state = store.get(LOG).await.unwrap();
        assert_eq!(state.sth.unwrap().tree_size, 5);
        assert!(!state.processing);
    }

    #[tokio::test]
    async fn test_bad_signature_does_not_advance() {
        let log = MockLog::new(4);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        monitor.monitor_logs().await.unwrap();
        log.append(2);

        // Tree heads are now signed by a key the log does not advertise
        let rogue = SigningKey::generate(&mut rand::rngs::OsRng);
        let hashes = log.leaf_hashes();
        let forged = signed_sth(&rogue, 6, &root_from_leaf_hashes(&hashes), 1);

        let state = store.get(LOG).await.unwrap();
        let key = state.public_key.clone().unwrap();
        assert!(forged.verify(&key).is_err());

        *log.key.lock() = rogue;
        let expected_key = log.key.lock().verifying_key().to_bytes().to_vec();
        assert_ne!(key, expected_key);

        // Key rotation is picked up through WebFinger
        monitor.process_log(state).await.unwrap();
        let state = store.get(LOG).await.unwrap();
        assert_eq!(state.public_key, Some(expected_key));
        assert_eq!(state.sth.unwrap().tree_size, 6);
    }

    #[tokio::test]
    async fn test_processing_monitor_is_skipped() {
        let log = MockLog::new(3);
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        let mut state = store.get(LOG).await.unwrap();
        state.processing = true;
        store.update(&state).await.unwrap();

        monitor.monitor_logs().await.unwrap();
        assert!(log.calls().is_empty());

        monitor.recover().await.unwrap();
        assert!(!store.get(LOG).await.unwrap().processing);

        monitor.monitor_logs().await.unwrap();
        assert!(!log.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_log_resets_processing() {
        let log = MockLog::new(3);
        *log.down.lock() = true;
        let (store, monitor) = setup(vec![(LOG, log.clone())]).await;

        let state = store.get(LOG).await.unwrap();
        let err = monitor.process_log(state).await.unwrap_err();
        assert!(err.is_transient());

        let state = store.get(LOG).await.unwrap();
        assert!(!state.processing);
        assert!(state.sth.is_none());
    }

    #[tokio::test]
    async fn test_failing_log_does_not_block_others() {
        let healthy = MockLog::new(2);
        let broken = MockLog::new(2);
        *broken.down.lock() = true;

        let (store, monitor) = setup(vec![
            ("https://vct1.example.com", healthy),
            ("https://vct2.example.com", broken),
        ])
        .await;

        monitor.monitor_logs().await.unwrap();

        assert!(store.get("https://vct1.example.com").await.unwrap().sth.is_some());
        assert!(store.get("https://vct2.example.com").await.unwrap().sth.is_none());
    }
}
