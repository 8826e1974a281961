//! Signed tree heads and log signatures
//!
//! A tree head is signed over
//! `version(0) || signature_type(1) || timestamp || tree_size || root_hash`
//! with integers big-endian. Credential timestamps returned by `add-vc` are
//! signed over `version(0) || signature_type(0) || timestamp || credential`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::error::{Result, VctError};
use crate::merkle::Hash;

const VERSION: u8 = 0;
const SIGNATURE_TYPE_TIMESTAMP: u8 = 0;
const SIGNATURE_TYPE_TREE_HASH: u8 = 1;

/// Signed tree head as returned by `get-sth`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTreeHead {
    pub tree_size: u64,
    /// Milliseconds since the epoch
    pub timestamp: u64,
    /// Base64 root hash
    pub sha256_root_hash: String,
    /// Base64 Ed25519 signature
    pub tree_head_signature: String,
}

impl SignedTreeHead {
    pub fn root_hash(&self) -> Result<Hash> {
        decode_hash(&self.sha256_root_hash)
    }

    /// Bytes covered by the tree head signature
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        let root = self.root_hash()?;

        let mut out = Vec::with_capacity(2 + 8 + 8 + 32);
        out.push(VERSION);
        out.push(SIGNATURE_TYPE_TREE_HASH);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.tree_size.to_be_bytes());
        out.extend_from_slice(&root);
        Ok(out)
    }

    /// Verify the tree head signature with the log's public key
    pub fn verify(&self, public_key: &[u8]) -> Result<()> {
        let signature = STANDARD
            .decode(&self.tree_head_signature)
            .map_err(|e| VctError::Signature(format!("decode tree head signature: {e}")))?;

        verify_signature(public_key, &self.signed_bytes()?, &signature)
    }
}

/// Bytes covered by the log's signature over an added credential
pub fn timestamp_signed_bytes(timestamp: u64, credential: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + 8 + credential.len());
    out.push(VERSION);
    out.push(SIGNATURE_TYPE_TIMESTAMP);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(credential);
    out
}

/// Verify an Ed25519 signature made by the log
pub fn verify_signature(public_key: &[u8], message: &[u8], signature: &[u8]) -> Result<()> {
    let key_bytes: [u8; 32] = public_key
        .try_into()
        .map_err(|_| VctError::Signature(format!("invalid public key length {}", public_key.len())))?;

    let key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| VctError::Signature(format!("invalid public key: {e}")))?;

    let signature = Signature::from_slice(signature)
        .map_err(|e| VctError::Signature(format!("malformed signature: {e}")))?;

    key.verify(message, &signature)
        .map_err(|e| VctError::Signature(e.to_string()))
}

pub fn decode_hash(encoded: &str) -> Result<Hash> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| VctError::InvalidResponse(format!("decode hash: {e}")))?;

    bytes
        .as_slice()
        .try_into()
        .map_err(|_| VctError::InvalidResponse(format!("hash must be 32 bytes, got {}", bytes.len())))
}

pub fn encode_hash(hash: &Hash) -> String {
    STANDARD.encode(hash)
}
