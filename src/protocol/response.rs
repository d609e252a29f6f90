//! Response definitions
//!
//! Responses to clients. Every response carries `ok`; the remaining
//! fields are present only when meaningful so the wire stays compact.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::MeridianError;

/// A response to send to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,

    /// Value for a successful get
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// `false` when a get missed (tombstones read as misses)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<bool>,

    /// Matching keys for a full-text search
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keys: Option<Vec<String>>,

    /// (key, score) pairs for a similarity search, best first
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matches: Option<Vec<(String, f32)>>,

    /// Error code when `ok` is false
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Optional detail, e.g. the primary's port on `not_primary`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<serde_json::Value>,
}

impl Response {
    fn base(ok: bool) -> Self {
        Response {
            ok,
            value: None,
            found: None,
            keys: None,
            matches: None,
            error: None,
            hint: None,
        }
    }

    /// Plain success (mutations)
    pub fn ok() -> Self {
        Self::base(true)
    }

    /// Successful get
    pub fn with_value(value: String) -> Self {
        Response {
            value: Some(value),
            ..Self::base(true)
        }
    }

    /// Get miss
    pub fn not_found() -> Self {
        Response {
            found: Some(false),
            ..Self::base(true)
        }
    }

    /// Full-text search result
    pub fn with_keys(keys: Vec<String>) -> Self {
        Response {
            keys: Some(keys),
            ..Self::base(true)
        }
    }

    /// Similarity search result
    pub fn with_matches(matches: Vec<(String, f32)>) -> Self {
        Response {
            matches: Some(matches),
            ..Self::base(true)
        }
    }

    /// Error response carrying the wire code and an optional hint
    pub fn from_error(error: &MeridianError) -> Self {
        let hint = match error {
            MeridianError::NotPrimary { kv_port: Some(port) } => {
                Some(json!({ "primary_kv_port": port }))
            }
            MeridianError::NotPrimary { kv_port: None } => None,
            MeridianError::Protocol(detail) => Some(json!(detail)),
            MeridianError::Unavailable(detail) => Some(json!(detail)),
            _ => None,
        };
        Response {
            error: Some(error.code().to_string()),
            hint,
            ..Self::base(false)
        }
    }

    /// Protocol error from a bare message (used before a request exists)
    pub fn protocol_error(detail: &str) -> Self {
        Self::from_error(&MeridianError::Protocol(detail.to_string()))
    }
}
