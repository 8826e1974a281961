//! Store abstraction
//!
//! Records are opaque values under a string key, indexed by name/value tags.
//! Queries select records by a single tag expression:
//!
//! | Expression          | Matches                                    |
//! |---------------------|--------------------------------------------|
//! | `Name`              | records carrying the tag                   |
//! | `Name:Value`        | tag equal to `Value`                       |
//! | `Name<=N` (`<`,`>`,`>=`) | tag value parsed as integer compared to `N` |

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StorageError};

/// Tag holding the unix-millisecond time after which a record may be dropped
pub const EXPIRY_TIME_TAG: &str = "ExpiryTime";

/// Indexed tag on a record
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl ToString) -> Self {
        Self {
            name: name.into(),
            value: value.to_string(),
        }
    }
}

/// Stored record
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub key: String,
    pub value: Vec<u8>,
    pub tags: Vec<Tag>,
}

impl Record {
    /// Value of the named tag, if present
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }
}

/// Batch operation
#[derive(Clone, Debug)]
pub enum Operation {
    Put {
        key: String,
        value: Vec<u8>,
        tags: Vec<Tag>,
    },
    Delete {
        key: String,
    },
}

/// Numeric comparison operator
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn apply(&self, lhs: i64, rhs: i64) -> bool {
        match self {
            Self::Lt => lhs < rhs,
            Self::Le => lhs <= rhs,
            Self::Gt => lhs > rhs,
            Self::Ge => lhs >= rhs,
        }
    }
}

/// Parsed tag query
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Query {
    Has { name: String },
    Equals { name: String, value: String },
    Compare { name: String, op: CompareOp, value: i64 },
}

impl Query {
    pub fn equals(name: impl Into<String>, value: impl ToString) -> Self {
        Self::Equals {
            name: name.into(),
            value: value.to_string(),
        }
    }

    pub fn compare(name: impl Into<String>, op: CompareOp, value: i64) -> Self {
        Self::Compare {
            name: name.into(),
            op,
            value,
        }
    }

    /// Parse a query expression
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(StorageError::InvalidQuery("empty expression".to_string()));
        }

        let Some(pos) = expr.find([':', '<', '>']) else {
            return Ok(Self::Has {
                name: expr.to_string(),
            });
        };

        let name = &expr[..pos];
        if name.is_empty() {
            return Err(StorageError::InvalidQuery(format!("missing tag name: {expr}")));
        }

        let rest = &expr[pos..];
        if let Some(value) = rest.strip_prefix(':') {
            return Ok(Self::equals(name, value));
        }

        let (op, raw) = if let Some(v) = rest.strip_prefix("<=") {
            (CompareOp::Le, v)
        } else if let Some(v) = rest.strip_prefix(">=") {
            (CompareOp::Ge, v)
        } else if let Some(v) = rest.strip_prefix('<') {
            (CompareOp::Lt, v)
        } else if let Some(v) = rest.strip_prefix('>') {
            (CompareOp::Gt, v)
        } else {
            return Err(StorageError::InvalidQuery(expr.to_string()));
        };

        let value = raw
            .trim()
            .parse::<i64>()
            .map_err(|_| StorageError::InvalidQuery(format!("non-numeric operand: {expr}")))?;

        Ok(Self::compare(name, op, value))
    }

    /// Check if a record's tags satisfy the query
    pub fn matches(&self, tags: &[Tag]) -> bool {
        match self {
            Self::Has { name } => tags.iter().any(|t| &t.name == name),
            Self::Equals { name, value } => tags.iter().any(|t| &t.name == name && &t.value == value),
            Self::Compare { name, op, value } => tags.iter().any(|t| {
                &t.name == name
                    && t.value
                        .parse::<i64>()
                        .map(|v| op.apply(v, *value))
                        .unwrap_or(false)
            }),
        }
    }
}

/// Key-value store with tag-indexed queries.
///
/// Individual puts and deletes are atomic; batches are applied in order.
/// Callers implement no transactions of their own.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put(&self, key: &str, value: Vec<u8>, tags: Vec<Tag>) -> Result<()>;

    /// Fails with [`StorageError::NotFound`] if the key is absent
    async fn get(&self, key: &str) -> Result<Vec<u8>>;

    async fn get_tags(&self, key: &str) -> Result<Vec<Tag>>;

    async fn query(&self, query: &Query) -> Result<Vec<Record>>;

    /// Deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    async fn batch(&self, operations: Vec<Operation>) -> Result<()>;
}
