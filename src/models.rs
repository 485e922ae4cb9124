//! Core data types shared across the store, coordinator, and HTTP layer.
//!
//! A [`Document`] is the primary entity: an opaque string id, free-text
//! content, and a flat string key/value metadata map. Metadata uses a
//! `BTreeMap` so JSON output is deterministic regardless of insertion order.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};

/// A stored document with its metadata and store-maintained timestamps.
///
/// Timestamps are Unix epoch seconds. `created_at` is set once on first
/// insert and survives upserts; `updated_at` changes on every mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A single search hit returned by any of the search paths.
///
/// For semantic search, `score = 1 / (1 + distance)` where `distance` is the
/// ANN index's Euclidean distance between unit-norm embeddings. The score is
/// monotone in cosine similarity but is *not* cosine similarity itself.
/// Substring and metadata matches carry a fixed score of `1.0`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub id: String,
    pub text: String,
    pub score: f32,
    pub metadata: BTreeMap<String, String>,
}

/// Input for a batch insert: text plus optional metadata and custom id.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub text: String,
    pub metadata: BTreeMap<String, String>,
    pub custom_id: Option<String>,
}

/// Generate a fresh document id: `doc_` + 12 random alphanumerics + `_` +
/// millisecond timestamp. The random suffix keeps two ids generated within
/// the same millisecond distinct.
pub fn generate_document_id() -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect();
    format!("doc_{}_{}", suffix, now_millis())
}

/// Current Unix time in seconds.
pub(crate) fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Current Unix time in milliseconds.
pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
