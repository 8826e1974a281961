//! Credential witnessing
//!
//! A node witnesses an anchor credential by signing it. When a transparency
//! log is configured the credential is first added to the log, the proof is
//! created at the log's timestamp with the log as its domain, and the log's
//! signature over that timestamp is verified before the proof is returned.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use ed25519_dalek::{Signer as _, SigningKey};
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::client::LogClient;
use crate::error::{Result, VctError};
use crate::sth::{timestamp_signed_bytes, verify_signature};

/// JSON-LD context of Ed25519 proofs
pub const ED25519_2020_CONTEXT: &str = "https://w3id.org/security/suites/ed25519-2020/v1";

/// Produces linked-data proofs
pub trait Signer: Send + Sync {
    /// JSON-LD context the proofs are defined in
    fn context(&self) -> &str;

    /// Sign `document` and return the proof object
    fn sign(&self, document: &[u8], created: DateTime<Utc>, domain: Option<&str>) -> Result<Value>;
}

/// Ed25519 signer
pub struct Ed25519Signer {
    key: SigningKey,
    verification_method: String,
}

impl Ed25519Signer {
    pub fn new(key: SigningKey, verification_method: impl Into<String>) -> Self {
        Self {
            key,
            verification_method: verification_method.into(),
        }
    }

    /// Signer from a base64 32-byte secret key
    pub fn from_base64(secret: &str, verification_method: impl Into<String>) -> Result<Self> {
        let bytes = STANDARD
            .decode(secret.trim())
            .map_err(|e| VctError::Signing(format!("decode signing key: {e}")))?;

        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VctError::Signing(format!("signing key must be 32 bytes, got {}", bytes.len())))?;

        Ok(Self::new(SigningKey::from_bytes(&secret), verification_method))
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.key.verifying_key().to_bytes()
    }
}

impl Signer for Ed25519Signer {
    fn context(&self) -> &str {
        ED25519_2020_CONTEXT
    }

    fn sign(&self, document: &[u8], created: DateTime<Utc>, domain: Option<&str>) -> Result<Value> {
        let signature = self.key.sign(document);

        let mut proof = json!({
            "type": "Ed25519Signature2020",
            "created": created.to_rfc3339_opts(SecondsFormat::Millis, true),
            "verificationMethod": self.verification_method,
            "proofPurpose": "assertionMethod",
            "proofValue": STANDARD.encode(signature.to_bytes()),
        });

        if let (Some(domain), Some(obj)) = (domain, proof.as_object_mut()) {
            obj.insert("domain".into(), Value::String(domain.to_string()));
        }

        Ok(proof)
    }
}

/// Credential bytes without any embedded proof.
///
/// `serde_json` maps are ordered by key, so the output is stable for equal
/// credentials.
pub fn canonical_credential(credential: &[u8]) -> Result<Vec<u8>> {
    let value: Value = serde_json::from_slice(credential)
        .map_err(|e| VctError::InvalidCredential(format!("parse credential: {e}")))?;

    let Value::Object(mut obj) = value else {
        return Err(VctError::InvalidCredential("credential is not a JSON object".into()));
    };

    obj.remove("proof");

    serde_json::to_vec(&Value::Object(obj)).map_err(|e| VctError::InvalidCredential(e.to_string()))
}

/// Witnesses anchor credentials, optionally through a transparency log
pub struct VctWitness {
    signer: Arc<dyn Signer>,
    log: Option<(String, Arc<dyn LogClient>)>,
}

impl VctWitness {
    /// Witness that signs locally without a log
    pub fn new(signer: Arc<dyn Signer>) -> Self {
        Self { signer, log: None }
    }

    /// Witness that records credentials in the log at `log_url`
    pub fn with_log(signer: Arc<dyn Signer>, log_url: impl Into<String>, client: Arc<dyn LogClient>) -> Self {
        Self {
            signer,
            log: Some((log_url.into(), client)),
        }
    }

    pub fn log_url(&self) -> Option<&str> {
        self.log.as_ref().map(|(url, _)| url.as_str())
    }

    /// Witness `credential` and return `{"@context": ..., "proof": ...}`
    pub async fn witness(&self, credential: &[u8]) -> Result<Vec<u8>> {
        let document = canonical_credential(credential)?;

        let Some((log_url, client)) = &self.log else {
            let proof = self.signer.sign(&document, Utc::now(), None)?;
            tracing::debug!("Credential witnessed locally");
            return self.wrap(proof);
        };

        let added = client.add_vc(&document).await?;

        let created = timestamp_to_datetime(added.timestamp)?;
        let proof = self.signer.sign(&document, created, Some(log_url))?;

        let public_key = client.get_public_key().await?;

        let signature = STANDARD
            .decode(&added.signature)
            .map_err(|e| VctError::Signature(format!("decode log signature: {e}")))?;

        verify_signature(
            &public_key,
            &timestamp_signed_bytes(added.timestamp, &document),
            &signature,
        )?;

        tracing::debug!(log = %log_url, timestamp = added.timestamp, "Credential witnessed by log");
        self.wrap(proof)
    }

    fn wrap(&self, proof: Value) -> Result<Vec<u8>> {
        let mut out = Map::new();
        out.insert("@context".into(), Value::String(self.signer.context().to_string()));
        out.insert("proof".into(), proof);

        serde_json::to_vec(&Value::Object(out)).map_err(|e| VctError::Signing(e.to_string()))
    }
}

fn timestamp_to_datetime(millis: u64) -> Result<DateTime<Utc>> {
    i64::try_from(millis)
        .ok()
        .and_then(|m| Utc.timestamp_millis_opt(m).single())
        .ok_or_else(|| VctError::InvalidResponse(format!("invalid log timestamp {millis}")))
}
