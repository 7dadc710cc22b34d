//! Hash-chained log of committed review decisions.
//!
//! Each entry hashes the previous entry's hash together with its own
//! canonical JSON, so rewriting any committed decision breaks every later
//! link.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// `prev_hash` of the first entry.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Audit chain errors.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Entry {seq} does not link to its predecessor")]
    BrokenLink { seq: i64 },

    #[error("Entry {seq} hash mismatch")]
    HashMismatch { seq: i64 },
}

/// What gets recorded for one committed decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionRecord {
    pub prescription_id: String,
    pub action: String,
    pub from_status: String,
    pub to_status: String,
    pub reviewer: String,
    pub notes: String,
    pub linked_order_id: Option<String>,
    /// Canonical JSON of the submitted `ReviewDecision`
    pub payload: String,
}

/// A persisted log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub seq: i64,
    pub record: DecisionRecord,
    pub prev_hash: String,
    pub entry_hash: String,
    pub created_at: String,
}

/// Hash raw bytes with SHA-256, hex encoded.
pub fn hash_data(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hash of a record chained onto `prev_hash`.
pub fn hash_record(prev_hash: &str, record: &DecisionRecord) -> Result<String, AuditError> {
    let canonical = serde_json::to_string(record)?;
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical.as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a full chain in sequence order.
pub fn verify_chain(entries: &[AuditEntry]) -> Result<(), AuditError> {
    let mut expected_prev = GENESIS_HASH.to_string();

    for entry in entries {
        if entry.prev_hash != expected_prev {
            return Err(AuditError::BrokenLink { seq: entry.seq });
        }
        if hash_record(&entry.prev_hash, &entry.record)? != entry.entry_hash {
            return Err(AuditError::HashMismatch { seq: entry.seq });
        }
        expected_prev = entry.entry_hash.clone();
    }

    Ok(())
}
