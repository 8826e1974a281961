//! Transparency log client
//!
//! [`LogClient`] is the seam between the witness/monitor logic and a log.
//! [`HttpLogClient`] speaks the log's JSON API:
//!
//! | Call | Endpoint |
//! |------|----------|
//! | `get_sth` | `GET /ct/v1/get-sth` |
//! | `get_sth_consistency` | `GET /ct/v1/get-sth-consistency?first=&second=` |
//! | `get_entries` | `GET /ct/v1/get-entries?start=&end=` |
//! | `add_vc` | `POST /ct/v1/add-vc` |
//! | `get_public_key` | `GET /.well-known/webfinger?resource=<log>` |
//!
//! Connection failures and 5xx responses are transient; every other
//! failure is permanent.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::error::{Result, VctError};
use crate::merkle::Hash;
use crate::sth::{decode_hash, SignedTreeHead};

/// Largest range the log returns from one `get-entries` call
pub const MAX_ENTRIES_PER_REQUEST: u64 = 1000;

/// WebFinger property holding the log's base64 public key
pub const PUBLIC_KEY_PROPERTY: &str = "https://trustbloc.dev/ns/public-key";

pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Log entry as returned by `get-entries`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeafEntry {
    /// Base64 leaf data
    pub leaf_input: String,
    #[serde(default)]
    pub extra_data: String,
}

impl LeafEntry {
    pub fn leaf_data(&self) -> Result<Vec<u8>> {
        STANDARD
            .decode(&self.leaf_input)
            .map_err(|e| VctError::InvalidResponse(format!("decode leaf input: {e}")))
    }
}

/// Response of `add-vc`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddVcResponse {
    #[serde(default)]
    pub svct_version: u8,
    /// Base64 log ID
    #[serde(default)]
    pub id: String,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    #[serde(default)]
    pub extensions: String,
    /// Base64 Ed25519 signature over the timestamped credential
    pub signature: String,
}

#[derive(Deserialize)]
struct ConsistencyResponse {
    consistency: Vec<String>,
}

#[derive(Deserialize)]
struct EntriesResponse {
    entries: Vec<LeafEntry>,
}

#[derive(Deserialize)]
struct WebFingerResponse {
    #[serde(default)]
    properties: HashMap<String, serde_json::Value>,
}

/// Client of one transparency log
#[async_trait]
pub trait LogClient: Send + Sync {
    async fn get_sth(&self) -> Result<SignedTreeHead>;

    async fn get_sth_consistency(&self, first: u64, second: u64) -> Result<Vec<Hash>>;

    /// Entries in `[start, end]` (inclusive). The log may return fewer.
    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LeafEntry>>;

    /// Raw Ed25519 public key advertised through WebFinger
    async fn get_public_key(&self) -> Result<Vec<u8>>;

    async fn add_vc(&self, credential: &[u8]) -> Result<AddVcResponse>;
}

/// Opens a client for a log URL
pub trait LogClientProvider: Send + Sync {
    fn client(&self, log_url: &str) -> Result<Arc<dyn LogClient>>;
}

/// Fetch entries `[0, tree_size)` in chunks of at most
/// [`MAX_ENTRIES_PER_REQUEST`]
pub async fn get_all_entries(client: &dyn LogClient, tree_size: u64) -> Result<Vec<LeafEntry>> {
    let mut entries = Vec::with_capacity(tree_size.min(1 << 20) as usize);

    while (entries.len() as u64) < tree_size {
        let start = entries.len() as u64;
        let end = (start + MAX_ENTRIES_PER_REQUEST).min(tree_size) - 1;

        let chunk = client.get_entries(start, end).await?;
        if chunk.is_empty() {
            return Err(VctError::InvalidResponse(format!(
                "log returned no entries for range [{start}, {end}]"
            )));
        }

        entries.extend(chunk.into_iter().take((end - start + 1) as usize));
    }

    Ok(entries)
}

// ============================================================================
// HTTP Client
// ============================================================================

/// HTTP client of one log
pub struct HttpLogClient {
    endpoint: Url,
    client: reqwest::Client,
}

impl HttpLogClient {
    pub fn new(endpoint: &str, client: reqwest::Client) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| VctError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;

        if endpoint.cannot_be_a_base() {
            return Err(VctError::InvalidEndpoint {
                endpoint: endpoint.to_string(),
                reason: "not a base URL".into(),
            });
        }

        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.endpoint.as_str().trim_end_matches('/');

        Url::parse(&format!("{base}/{path}")).map_err(|e| VctError::InvalidEndpoint {
            endpoint: self.endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    fn webfinger_url(&self) -> Result<Url> {
        let mut url = self.endpoint.join("/.well-known/webfinger").map_err(|e| VctError::InvalidEndpoint {
            endpoint: self.endpoint.to_string(),
            reason: e.to_string(),
        })?;

        url.query_pairs_mut()
            .append_pair("resource", self.endpoint.as_str().trim_end_matches('/'));
        Ok(url)
    }

    async fn read<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let response = request
            .send()
            .await
            .map_err(|e| VctError::Unavailable(format!("{}: {e}", self.endpoint)))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(VctError::Unavailable(format!("{}: status {status}", self.endpoint)));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VctError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json()
            .await
            .map_err(|e| VctError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl LogClient for HttpLogClient {
    async fn get_sth(&self) -> Result<SignedTreeHead> {
        let url = self.url("ct/v1/get-sth")?;
        self.read(self.client.get(url)).await
    }

    async fn get_sth_consistency(&self, first: u64, second: u64) -> Result<Vec<Hash>> {
        let mut url = self.url("ct/v1/get-sth-consistency")?;
        url.query_pairs_mut()
            .append_pair("first", &first.to_string())
            .append_pair("second", &second.to_string());

        let response: ConsistencyResponse = self.read(self.client.get(url)).await?;

        response.consistency.iter().map(|h| decode_hash(h)).collect()
    }

    async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LeafEntry>> {
        let mut url = self.url("ct/v1/get-entries")?;
        url.query_pairs_mut()
            .append_pair("start", &start.to_string())
            .append_pair("end", &end.to_string());

        let response: EntriesResponse = self.read(self.client.get(url)).await?;
        Ok(response.entries)
    }

    async fn get_public_key(&self) -> Result<Vec<u8>> {
        let url = self.webfinger_url()?;
        let response: WebFingerResponse = self.read(self.client.get(url)).await?;

        let encoded = response
            .properties
            .get(PUBLIC_KEY_PROPERTY)
            .and_then(|v| v.as_str())
            .ok_or_else(|| VctError::InvalidResponse(format!("webfinger has no {PUBLIC_KEY_PROPERTY} property")))?;

        STANDARD
            .decode(encoded)
            .map_err(|e| VctError::InvalidResponse(format!("decode public key: {e}")))
    }

    async fn add_vc(&self, credential: &[u8]) -> Result<AddVcResponse> {
        let url = self.url("ct/v1/add-vc")?;

        let request = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(credential.to_vec());

        self.read(request).await
    }
}

/// Creates [`HttpLogClient`]s sharing one connection pool
pub struct HttpLogClientProvider {
    client: reqwest::Client,
}

impl HttpLogClientProvider {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VctError::InvalidEndpoint {
                endpoint: String::new(),
                reason: format!("build HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }
}

impl LogClientProvider for HttpLogClientProvider {
    fn client(&self, log_url: &str) -> Result<Arc<dyn LogClient>> {
        Ok(Arc::new(HttpLogClient::new(log_url, self.client.clone())?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn test_endpoint_urls() {
        let client = HttpLogClient::new("https://vct.example.com/maple2020/", reqwest::Client::new()).unwrap();

        assert_eq!(
            client.url("ct/v1/get-sth").unwrap().as_str(),
            "https://vct.example.com/maple2020/ct/v1/get-sth"
        );
        assert_eq!(
            client.webfinger_url().unwrap().as_str(),
            "https://vct.example.com/.well-known/webfinger?resource=https%3A%2F%2Fvct.example.com%2Fmaple2020"
        );
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(matches!(
            HttpLogClient::new("not a url", reqwest::Client::new()),
            Err(VctError::InvalidEndpoint { .. })
        ));
        assert!(HttpLogClient::new("mailto:log@example.com", reqwest::Client::new()).is_err());
    }

    #[test]
    fn test_wire_formats() {
        let sth: SignedTreeHead = serde_json::from_str(
            r#"{"tree_size":2,"timestamp":1617000000000,"sha256_root_hash":"AAAA","tree_head_signature":"BBBB"}"#,
        )
        .unwrap();
        assert_eq!(sth.tree_size, 2);

        let resp: AddVcResponse =
            serde_json::from_str(r#"{"svct_version":0,"id":"aWQ=","timestamp":42,"signature":"c2ln"}"#).unwrap();
        assert_eq!(resp.timestamp, 42);

        let entry = LeafEntry {
            leaf_input: STANDARD.encode(b"vc"),
            extra_data: String::new(),
        };
        assert_eq!(entry.leaf_data().unwrap(), b"vc");
    }

    /// Serves `size` entries and records every requested range
    struct RangeLog {
        size: u64,
        requests: Mutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl LogClient for RangeLog {
        async fn get_sth(&self) -> Result<SignedTreeHead> {
            unreachable!()
        }

        async fn get_sth_consistency(&self, _: u64, _: u64) -> Result<Vec<Hash>> {
            unreachable!()
        }

        async fn get_entries(&self, start: u64, end: u64) -> Result<Vec<LeafEntry>> {
            self.requests.lock().push((start, end));

            Ok((start..=end.min(self.size - 1))
                .map(|i| LeafEntry {
                    leaf_input: STANDARD.encode(i.to_be_bytes()),
                    extra_data: String::new(),
                })
                .collect())
        }

        async fn get_public_key(&self) -> Result<Vec<u8>> {
            unreachable!()
        }

        async fn add_vc(&self, _: &[u8]) -> Result<AddVcResponse> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_get_all_entries_is_chunked() {
        let log = RangeLog {
            size: 2500,
            requests: Mutex::new(Vec::new()),
        };

        let entries = get_all_entries(&log, 2500).await.unwrap();
        assert_eq!(entries.len(), 2500);
        assert_eq!(
            *log.requests.lock(),
            vec![(0, 999), (1000, 1999), (2000, 2499)]
        );
    }

    #[tokio::test]
    async fn test_get_all_entries_empty_tree() {
        let log = RangeLog {
            size: 0,
            requests: Mutex::new(Vec::new()),
        };

        assert!(get_all_entries(&log, 0).await.unwrap().is_empty());
        assert!(log.requests.lock().is_empty());
    }
}
