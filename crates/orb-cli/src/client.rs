//! REST client for the node's administrative endpoints

use anyhow::Context;
use serde::Serialize;
use url::Url;

/// Body of an accept-list update
#[derive(Debug, PartialEq, Serialize)]
pub struct AcceptListRequest {
    #[serde(rename = "type")]
    pub list_type: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub remove: Vec<String>,
}

/// Thin wrapper over `reqwest` adding the optional bearer token
pub struct AdminClient {
    http: reqwest::Client,
    auth_token: Option<String>,
}

impl AdminClient {
    pub fn new(auth_token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            auth_token,
        }
    }

    /// POST the raw policy string
    pub async fn update_policy(&self, endpoint: &str, policy: &str) -> anyhow::Result<String> {
        orb_policy::WitnessPolicyConfig::parse(policy).map_err(|e| anyhow::anyhow!("invalid policy: {e}"))?;

        let url = parse_endpoint(endpoint)?;
        let request = self.http.post(url).body(policy.to_string());
        self.send(request).await
    }

    pub async fn get_policy(&self, endpoint: &str) -> anyhow::Result<String> {
        let url = parse_endpoint(endpoint)?;
        self.send(self.http.get(url)).await
    }

    pub async fn update_accept_list(&self, endpoint: &str, request: &AcceptListRequest) -> anyhow::Result<String> {
        let url = parse_endpoint(endpoint)?;
        self.send(self.http.post(url).json(request)).await
    }

    pub async fn get_accept_list(&self, endpoint: &str, list_type: Option<&str>) -> anyhow::Result<String> {
        let url = accept_list_url(endpoint, list_type)?;
        self.send(self.http.get(url)).await
    }

    async fn send(&self, mut request: reqwest::RequestBuilder) -> anyhow::Result<String> {
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("request failed")?;
        let status = response.status();
        let body = response.text().await.context("read response body")?;

        if !status.is_success() {
            anyhow::bail!("server returned {status}: {body}");
        }

        Ok(body)
    }
}

fn parse_endpoint(endpoint: &str) -> anyhow::Result<Url> {
    Url::parse(endpoint).with_context(|| format!("invalid endpoint URL [{endpoint}]"))
}

/// Endpoint URL with the optional `type` query
pub fn accept_list_url(endpoint: &str, list_type: Option<&str>) -> anyhow::Result<Url> {
    let mut url = parse_endpoint(endpoint)?;
    if let Some(list_type) = list_type {
        url.query_pairs_mut().append_pair("type", list_type);
    }
    Ok(url)
}
