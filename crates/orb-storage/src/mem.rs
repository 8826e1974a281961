//! In-memory store provider
//!
//! Records live in a `HashMap` behind a read/write lock. Queries scan every
//! record; this provider is meant for single-node deployments and tests.

use async_trait::async_trait;
use orb_core::Lifecycle;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use crate::error::{Result, StorageError};
use crate::store::{Operation, Query, Record, Store, Tag, EXPIRY_TIME_TAG};

/// In-memory tag-indexed store
pub struct MemStore {
    data: RwLock<HashMap<String, Record>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Drop every record whose `ExpiryTime` tag is at or before `now_millis`.
    ///
    /// Returns the number of records removed.
    pub fn expire_before(&self, now_millis: i64) -> usize {
        let mut data = self.data.write();
        let before = data.len();

        data.retain(|_, record| {
            record
                .tag(EXPIRY_TIME_TAG)
                .and_then(|v| v.parse::<i64>().ok())
                .map_or(true, |expiry| expiry > now_millis)
        });

        before - data.len()
    }

    fn put_record(data: &mut HashMap<String, Record>, key: &str, value: Vec<u8>, tags: Vec<Tag>) {
        data.insert(
            key.to_string(),
            Record {
                key: key.to_string(),
                value,
                tags,
            },
        );
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for MemStore {
    async fn put(&self, key: &str, value: Vec<u8>, tags: Vec<Tag>) -> Result<()> {
        if key.is_empty() {
            return Err(StorageError::Backend("key is mandatory".to_string()));
        }

        Self::put_record(&mut self.data.write(), key, value, tags);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        self.data
            .read()
            .get(key)
            .map(|r| r.value.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn get_tags(&self, key: &str) -> Result<Vec<Tag>> {
        self.data
            .read()
            .get(key)
            .map(|r| r.tags.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Record>> {
        Ok(self
            .data
            .read()
            .values()
            .filter(|r| query.matches(&r.tags))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn batch(&self, operations: Vec<Operation>) -> Result<()> {
        let mut data = self.data.write();

        for op in operations {
            match op {
                Operation::Put { key, value, tags } => {
                    if key.is_empty() {
                        return Err(StorageError::Backend("key is mandatory".to_string()));
                    }
                    Self::put_record(&mut data, &key, value, tags);
                }
                Operation::Delete { key } => {
                    data.remove(&key);
                }
            }
        }

        Ok(())
    }
}

/// Named in-memory stores, one per concern
pub struct MemStoreProvider {
    stores: RwLock<HashMap<String, Arc<MemStore>>>,
}

impl MemStoreProvider {
    pub fn new() -> Self {
        Self {
            stores: RwLock::new(HashMap::new()),
        }
    }

    /// Open (creating on first use) the store with the given name
    pub fn open_store(&self, name: &str) -> Arc<MemStore> {
        if let Some(store) = self.stores.read().get(name) {
            return store.clone();
        }

        self.stores
            .write()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemStore::new()))
            .clone()
    }

    /// Expire records across every open store
    pub fn expire_before(&self, now_millis: i64) -> usize {
        let stores: Vec<Arc<MemStore>> = self.stores.read().values().cloned().collect();
        stores.iter().map(|s| s.expire_before(now_millis)).sum()
    }
}

impl Default for MemStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Periodically drops expired records from every store of a [`MemStoreProvider`]
pub struct ExpiryService {
    store: Arc<MemStoreProvider>,
    interval: Duration,
    lifecycle: Lifecycle,
    done: Mutex<Option<watch::Sender<bool>>>,
}

impl ExpiryService {
    pub fn new(store: Arc<MemStoreProvider>, interval: Duration) -> Self {
        Self {
            store,
            interval,
            lifecycle: Lifecycle::new("expiry"),
            done: Mutex::new(None),
        }
    }

    /// Start the sweep loop. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.lifecycle.start(|| {
            let (done_tx, mut done_rx) = watch::channel(false);
            *self.done.lock() = Some(done_tx);

            let store = self.store.clone();
            let mut ticker = tokio::time::interval(self.interval);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let removed = store.expire_before(chrono::Utc::now().timestamp_millis());
                            if removed > 0 {
                                tracing::debug!(removed, "Expired records removed");
                            }
                        }
                        _ = done_rx.changed() => break,
                    }
                }
                tracing::debug!("Expiry loop exited");
            });
        });
    }

    pub fn stop(&self) {
        self.lifecycle.stop(|| {
            if let Some(done) = self.done.lock().take() {
                let _ = done.send(true);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemStore::new();

        store
            .put("k1", b"v1".to_vec(), vec![Tag::new("Type", "a")])
            .await
            .unwrap();

        assert_eq!(store.get("k1").await.unwrap(), b"v1".to_vec());
        assert_eq!(store.get_tags("k1").await.unwrap(), vec![Tag::new("Type", "a")]);

        store.delete("k1").await.unwrap();
        assert!(matches!(store.get("k1").await, Err(StorageError::NotFound(_))));

        // Deleting again is fine
        store.delete("k1").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_and_batch() {
        let store = MemStore::new();

        store
            .batch(vec![
                Operation::Put {
                    key: "a".into(),
                    value: vec![1],
                    tags: vec![Tag::new("Type", "x")],
                },
                Operation::Put {
                    key: "b".into(),
                    value: vec![2],
                    tags: vec![Tag::new("Type", "y")],
                },
                Operation::Put {
                    key: "c".into(),
                    value: vec![3],
                    tags: vec![Tag::new("Type", "x")],
                },
                Operation::Delete { key: "c".into() },
            ])
            .await
            .unwrap();

        let records = store.query(&Query::parse("Type:x").unwrap()).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "a");
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_expire_before() {
        let store = MemStore::new();

        store
            .put("old", vec![], vec![Tag::new(EXPIRY_TIME_TAG, 100)])
            .await
            .unwrap();
        store
            .put("new", vec![], vec![Tag::new(EXPIRY_TIME_TAG, 300)])
            .await
            .unwrap();
        store.put("forever", vec![], vec![]).await.unwrap();

        assert_eq!(store.expire_before(200), 1);
        assert!(store.get("old").await.is_err());
        assert!(store.get("new").await.is_ok());
        assert!(store.get("forever").await.is_ok());
    }

    #[test]
    fn test_provider_opens_named_stores() {
        let provider = MemStoreProvider::new();

        let a = provider.open_store("anchor-status");
        let b = provider.open_store("witness");
        let a2 = provider.open_store("anchor-status");

        assert!(Arc::ptr_eq(&a, &a2));
        assert!(!Arc::ptr_eq(&a, &b));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_service() {
        let provider = Arc::new(MemStoreProvider::new());
        let store = provider.open_store("status");
        store
            .put("expired", vec![], vec![Tag::new(EXPIRY_TIME_TAG, 1)])
            .await
            .unwrap();

        let service = ExpiryService::new(provider.clone(), Duration::from_millis(10));
        service.start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(store.is_empty());

        service.stop();
    }
}
