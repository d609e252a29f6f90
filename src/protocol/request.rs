//! Request definitions
//!
//! Client requests, tagged by the `op` field.

use serde::{Deserialize, Serialize};

fn default_top_k() -> usize {
    10
}

/// A parsed client request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    /// Read a value by key
    Get { key: String },

    /// Write a value. `debug_simulate_fail` arms the snapshot fault
    /// switch; the WAL is never affected.
    Set {
        key: String,
        value: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        debug_simulate_fail: bool,
    },

    /// Delete a key
    Delete {
        key: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        debug_simulate_fail: bool,
    },

    /// Set multiple pairs atomically
    #[serde(rename = "bulkset")]
    BulkSet {
        pairs: Vec<(String, String)>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        debug_simulate_fail: bool,
    },

    /// Full-text search over values (requires indexes)
    Search { query: String },

    /// Embedding-similarity search over values (requires indexes)
    SearchSimilar {
        query: String,
        #[serde(default = "default_top_k")]
        top_k: usize,
    },
}
