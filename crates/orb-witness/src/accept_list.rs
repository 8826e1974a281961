//! Accept lists
//!
//! Accept lists name the servers a node trusts for a given interaction:
//! `follow` for follow requests and `invite-witness` for witnessing. Each
//! entry is a separate record tagged with its list type.

use async_trait::async_trait;
use orb_core::{OrbError, Result};
use orb_storage::{encode_tag_value, Operation, Query, Store, Tag};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use url::Url;

pub const FOLLOW_TYPE: &str = "follow";
pub const INVITE_WITNESS_TYPE: &str = "invite-witness";

const ACCEPT_LIST_TYPE_TAG: &str = "AcceptListType";

/// All entries of one list type
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptList {
    #[serde(rename = "type")]
    pub list_type: String,
    pub url: Vec<String>,
}

#[derive(Serialize, Deserialize)]
struct Entry {
    #[serde(rename = "type")]
    list_type: String,
    url: String,
}

/// Accept list manager
#[async_trait]
pub trait AcceptListManager: Send + Sync {
    /// Add and remove entries of `list_type`. Additions already present are
    /// ignored.
    async fn update(&self, list_type: &str, add: &[String], remove: &[String]) -> Result<()>;

    async fn get(&self, list_type: &str) -> Result<Vec<String>>;

    async fn get_all(&self) -> Result<Vec<AcceptList>>;
}

/// Accept list manager backed by a [`Store`]
pub struct StoreAcceptListManager {
    store: Arc<dyn Store>,
}

impl StoreAcceptListManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    fn key(list_type: &str, url: &str) -> String {
        format!("{list_type}#{}", encode_tag_value(url))
    }

    async fn entries(&self, query: &Query) -> Result<Vec<Entry>> {
        let records = self
            .store
            .query(query)
            .await
            .map_err(|e| OrbError::transient(format!("query accept list: {e}")))?;

        Ok(records
            .into_iter()
            .filter_map(|record| match serde_json::from_slice::<Entry>(&record.value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(key = %record.key, error = %e, "Skipping corrupt accept list entry");
                    None
                }
            })
            .collect())
    }
}

fn validate(list_type: &str, urls: &[String]) -> Result<()> {
    if list_type.is_empty() {
        return Err(OrbError::bad_request("accept list type is required"));
    }

    for url in urls {
        Url::parse(url).map_err(|e| OrbError::bad_request(format!("invalid accept list URL [{url}]: {e}")))?;
    }

    Ok(())
}

#[async_trait]
impl AcceptListManager for StoreAcceptListManager {
    async fn update(&self, list_type: &str, add: &[String], remove: &[String]) -> Result<()> {
        validate(list_type, add)?;

        let current: HashSet<String> = self.get(list_type).await?.into_iter().collect();
        let mut seen = HashSet::new();
        let mut operations = Vec::new();

        for url in add {
            if current.contains(url) || !seen.insert(url.as_str()) {
                continue;
            }

            let value = serde_json::to_vec(&Entry {
                list_type: list_type.to_string(),
                url: url.clone(),
            })
            .map_err(|e| OrbError::Internal(format!("marshal accept list entry: {e}")))?;

            operations.push(Operation::Put {
                key: Self::key(list_type, url),
                value,
                tags: vec![Tag::new(ACCEPT_LIST_TYPE_TAG, list_type)],
            });
        }

        for url in remove {
            operations.push(Operation::Delete {
                key: Self::key(list_type, url),
            });
        }

        if operations.is_empty() {
            return Ok(());
        }

        self.store
            .batch(operations)
            .await
            .map_err(|e| OrbError::transient(format!("update accept list [{list_type}]: {e}")))?;

        tracing::info!(list_type = %list_type, added = add.len(), removed = remove.len(), "Accept list updated");
        Ok(())
    }

    async fn get(&self, list_type: &str) -> Result<Vec<String>> {
        let mut urls: Vec<String> = self
            .entries(&Query::equals(ACCEPT_LIST_TYPE_TAG, list_type))
            .await?
            .into_iter()
            .map(|e| e.url)
            .collect();

        urls.sort();
        Ok(urls)
    }

    async fn get_all(&self) -> Result<Vec<AcceptList>> {
        let query = Query::Has {
            name: ACCEPT_LIST_TYPE_TAG.to_string(),
        };

        let mut lists: Vec<AcceptList> = Vec::new();
        for entry in self.entries(&query).await? {
            match lists.iter_mut().find(|l| l.list_type == entry.list_type) {
                Some(list) => list.url.push(entry.url),
                None => lists.push(AcceptList {
                    list_type: entry.list_type,
                    url: vec![entry.url],
                }),
            }
        }

        for list in &mut lists {
            list.url.sort();
        }
        lists.sort_by(|a, b| a.list_type.cmp(&b.list_type));

        Ok(lists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orb_storage::MemStore;

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_update_dedupes_and_removes() {
        let manager = StoreAcceptListManager::new(Arc::new(MemStore::new()));

        manager
            .update(
                INVITE_WITNESS_TYPE,
                &urls(&["https://orb.domain1.com/services/orb", "https://orb.domain2.com/services/orb"]),
                &[],
            )
            .await
            .unwrap();

        manager
            .update(
                INVITE_WITNESS_TYPE,
                &urls(&[
                    "https://orb.domain1.com/services/orb",
                    "https://orb.domain3.com/services/orb",
                    "https://orb.domain3.com/services/orb",
                ]),
                &urls(&["https://orb.domain2.com/services/orb"]),
            )
            .await
            .unwrap();

        assert_eq!(
            manager.get(INVITE_WITNESS_TYPE).await.unwrap(),
            urls(&["https://orb.domain1.com/services/orb", "https://orb.domain3.com/services/orb"])
        );
        assert!(manager.get(FOLLOW_TYPE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_all_groups_by_type() {
        let manager = StoreAcceptListManager::new(Arc::new(MemStore::new()));

        manager
            .update(FOLLOW_TYPE, &urls(&["https://orb.domain1.com/services/orb"]), &[])
            .await
            .unwrap();
        manager
            .update(INVITE_WITNESS_TYPE, &urls(&["https://orb.domain2.com/services/orb"]), &[])
            .await
            .unwrap();

        let all = manager.get_all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].list_type, FOLLOW_TYPE);
        assert_eq!(all[1].url, urls(&["https://orb.domain2.com/services/orb"]));
    }

    #[tokio::test]
    async fn test_invalid_entries_are_rejected() {
        let manager = StoreAcceptListManager::new(Arc::new(MemStore::new()));

        let err = manager.update(FOLLOW_TYPE, &urls(&["not a url"]), &[]).await.unwrap_err();
        assert!(matches!(err, OrbError::BadRequest(_)));

        let err = manager.update("", &[], &[]).await.unwrap_err();
        assert!(matches!(err, OrbError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_corrupt_entries_are_skipped() {
        let mem = Arc::new(MemStore::new());
        let manager = StoreAcceptListManager::new(mem.clone());

        manager
            .update(FOLLOW_TYPE, &urls(&["https://orb.domain1.com/services/orb"]), &[])
            .await
            .unwrap();
        mem.put("corrupt", b"{".to_vec(), vec![Tag::new(ACCEPT_LIST_TYPE_TAG, FOLLOW_TYPE)])
            .await
            .unwrap();

        assert_eq!(manager.get(FOLLOW_TYPE).await.unwrap().len(), 1);
        assert_eq!(manager.get_all().await.unwrap().len(), 1);
    }
}
