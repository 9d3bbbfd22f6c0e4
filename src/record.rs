//! The persistent record: what the external store holds for each cached
//! entry.
//!
//! A record carries one or more embeddings plus an arbitrary JSON
//! payload. Its external id is content-derived: the first 16 hex
//! characters of SHA-256 over the IEEE-754 big-endian bytes of the first
//! embedding. The id doubles as the record's filename stem in the
//! filesystem store, and identical first embeddings map to the same
//! record.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One stored record: external id, embeddings, free-form payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub embeddings: Vec<Vec<f32>>,
    pub data: serde_json::Value,
}

impl Record {
    /// Build a record, deriving the external id from the first
    /// embedding. Caller guarantees at least one embedding.
    pub fn new(embeddings: Vec<Vec<f32>>, data: serde_json::Value) -> Record {
        debug_assert!(!embeddings.is_empty());
        let id = external_id(&embeddings[0]);
        Record {
            id,
            embeddings,
            data,
        }
    }
}

/// Derive an external id: SHA-256 over the big-endian bytes of the
/// embedding, truncated to 8 bytes and rendered as 16 hex characters.
pub fn external_id(embedding: &[f32]) -> String {
    let mut hasher = Sha256::new();
    for &x in embedding {
        hasher.update(x.to_be_bytes());
    }
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}
