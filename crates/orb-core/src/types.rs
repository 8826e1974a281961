//! Core types for Orb witnessing

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::OrbError;

/// Witness role
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WitnessType {
    /// Witness named by the batch that produced the anchor
    Batch,
    /// Witness configured for the whole system
    System,
}

impl WitnessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Batch => "batch",
            Self::System => "system",
        }
    }
}

impl fmt::Display for WitnessType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WitnessType {
    type Err = OrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "batch" => Ok(Self::Batch),
            "system" => Ok(Self::System),
            other => Err(OrbError::BadRequest(format!("unknown witness type: {other}"))),
        }
    }
}

/// Witness - participant asked to attest an anchor credential
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Witness {
    /// Role of the witness
    #[serde(rename = "type")]
    pub witness_type: WitnessType,

    /// Actor identifier
    pub uri: String,

    /// Whether the witness operates a transparency log
    #[serde(default)]
    pub has_log: bool,

    /// Whether the witness was picked to receive the offer
    #[serde(default)]
    pub selected: bool,
}

impl Witness {
    /// Create a new, unselected witness
    pub fn new(witness_type: WitnessType, uri: impl Into<String>, has_log: bool) -> Self {
        Self {
            witness_type,
            uri: uri.into(),
            has_log,
            selected: false,
        }
    }
}

/// Witness proof - what a witness returned for an anchor
///
/// A record exists for every invited witness; `proof` stays `None` until the
/// witness responds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WitnessProof {
    #[serde(rename = "type")]
    pub witness_type: WitnessType,

    pub uri: String,

    #[serde(default)]
    pub has_log: bool,

    /// Opaque signed proof bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof: Option<Vec<u8>>,
}

impl WitnessProof {
    /// Proof slot for an invited witness
    pub fn pending(witness: &Witness) -> Self {
        Self {
            witness_type: witness.witness_type,
            uri: witness.uri.clone(),
            has_log: witness.has_log,
            proof: None,
        }
    }

    /// Check if the witness has responded
    pub fn has_proof(&self) -> bool {
        self.proof.as_ref().is_some_and(|p| !p.is_empty())
    }
}

/// Aggregate witnessing state of an anchor
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnchorIndexStatus {
    #[serde(rename = "in-process")]
    InProcess,
    #[serde(rename = "completed")]
    Completed,
}

impl AnchorIndexStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InProcess => "in-process",
            Self::Completed => "completed",
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for AnchorIndexStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnchorIndexStatus {
    type Err = OrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-process" => Ok(Self::InProcess),
            "completed" => Ok(Self::Completed),
            other => Err(OrbError::BadRequest(format!("unknown anchor status: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_witness_json_shape() {
        let witness = Witness::new(WitnessType::System, "https://orb.domain1.com/services/orb", true);
        let json = serde_json::to_value(&witness).unwrap();

        assert_eq!(json["type"], "system");
        assert_eq!(json["hasLog"], true);
        assert_eq!(json["selected"], false);
    }

    #[test]
    fn test_pending_proof() {
        let witness = Witness::new(WitnessType::Batch, "https://orb.domain2.com/services/orb", false);
        let mut proof = WitnessProof::pending(&witness);
        assert!(!proof.has_proof());

        proof.proof = Some(Vec::new());
        assert!(!proof.has_proof());

        proof.proof = Some(b"{\"proof\":{}}".to_vec());
        assert!(proof.has_proof());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AnchorIndexStatus::InProcess.to_string(), "in-process");
        assert_eq!("completed".parse::<AnchorIndexStatus>().unwrap(), AnchorIndexStatus::Completed);
        assert!("done".parse::<AnchorIndexStatus>().is_err());
        assert_eq!("batch".parse::<WitnessType>().unwrap(), WitnessType::Batch);
    }
}
