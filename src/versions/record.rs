//! Snapshot record format
//!
//! One JSON file per snapshot at `history/<name_key>/<snapshot_id>.json`:
//!
//! ```json
//! {
//!   "format_version": 1,
//!   "snapshot_id": "20260204T113000.123456Z-5f1c0e9a2b3d4c6e-9f86d081884c",
//!   "file_name": "notes/active.md",
//!   "content": "...",
//!   "content_hash": "sha256:...",
//!   "metadata": { "reason": "write", "size_bytes": 42, "token_count": 11 },
//!   "timestamp": "2026-02-04T11:30:00.123456Z",
//!   "checksum": "crc32:deadbeef"
//! }
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{BankError, BankResult};
use crate::hashing::{parse_record_checksum, record_checksum, ContentHash, ContentHasher};
use crate::markdown::estimate_tokens;

/// Current record format
pub const FORMAT_VERSION: u8 = 1;

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    Write,
    Rollback,
}

/// Descriptive facts about the snapshotted content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub reason: SnapshotReason,
    pub size_bytes: u64,
    pub token_count: u64,
    /// Source snapshot when the overwrite was a rollback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rolled_back_from: Option<String>,
}

impl SnapshotMetadata {
    pub fn for_content(
        reason: SnapshotReason,
        content: &str,
        rolled_back_from: Option<String>,
    ) -> Self {
        Self {
            reason,
            size_bytes: content.len() as u64,
            token_count: estimate_tokens(content),
            rolled_back_from,
        }
    }
}

/// An immutable copy of a document's content at write time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSnapshot {
    pub format_version: u8,
    pub snapshot_id: String,
    pub file_name: String,
    pub content: String,
    pub content_hash: ContentHash,
    #[serde(default)]
    pub metadata: Option<SnapshotMetadata>,
    /// RFC3339 UTC with microseconds
    pub timestamp: String,
    /// CRC32 of `content`
    pub checksum: String,
}

impl VersionSnapshot {
    pub(crate) fn new(
        snapshot_id: String,
        file_name: &str,
        content: &str,
        metadata: Option<SnapshotMetadata>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            snapshot_id,
            file_name: file_name.to_string(),
            content: content.to_string(),
            content_hash: ContentHasher::hash_str(content),
            metadata,
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
            checksum: record_checksum(content.as_bytes()),
        }
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> BankResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| BankError::CorruptSnapshot {
            snapshot_id: self.snapshot_id.clone(),
            reason: format!("serialization failed: {}", e),
        })
    }

    /// Parse and verify a record read from disk
    pub fn from_json(snapshot_id: &str, json: &str) -> BankResult<Self> {
        let corrupt = |reason: String| BankError::CorruptSnapshot {
            snapshot_id: snapshot_id.to_string(),
            reason,
        };

        let record: VersionSnapshot =
            serde_json::from_str(json).map_err(|e| corrupt(format!("invalid JSON: {}", e)))?;

        if record.format_version != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format_version {}",
                record.format_version
            )));
        }
        if record.snapshot_id != snapshot_id {
            return Err(corrupt(format!(
                "record claims id {}",
                record.snapshot_id
            )));
        }
        record.verify()?;
        Ok(record)
    }

    /// Check the stored checksum and hash against the content
    pub fn verify(&self) -> BankResult<()> {
        let corrupt = |reason: &str| BankError::CorruptSnapshot {
            snapshot_id: self.snapshot_id.clone(),
            reason: reason.to_string(),
        };

        let expected = parse_record_checksum(&self.checksum)
            .ok_or_else(|| corrupt("malformed checksum"))?;
        let actual = parse_record_checksum(&record_checksum(self.content.as_bytes()))
            .ok_or_else(|| corrupt("malformed checksum"))?;
        if expected != actual {
            return Err(corrupt("checksum mismatch"));
        }
        if ContentHasher::hash_str(&self.content) != self.content_hash {
            return Err(corrupt("content hash mismatch"));
        }
        Ok(())
    }
}

/// Base snapshot id: `<timestamp>-<name key>-<short hash>`
pub fn snapshot_id(at: DateTime<Utc>, file_name: &str, hash: &ContentHash) -> String {
    format!(
        "{}-{}-{}",
        at.format("%Y%m%dT%H%M%S%.6fZ"),
        ContentHasher::name_key(file_name),
        hash.short()
    )
}

/// Name key embedded in a snapshot id
pub fn name_key_of(snapshot_id: &str) -> Option<&str> {
    let mut parts = snapshot_id.split('-');
    let timestamp = parts.next()?;
    let key = parts.next()?;
    let hash = parts.next()?;
    let valid_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());

    let valid_timestamp = !timestamp.is_empty()
        && timestamp.chars().all(|c| c.is_ascii_alphanumeric() || c == '.');

    if !valid_timestamp || !valid_hex(key, 16) || !valid_hex(hash, 12) {
        return None;
    }
    match parts.next() {
        None => {}
        Some(n) if n.parse::<u32>().is_ok() && parts.next().is_none() => {}
        Some(_) => return None,
    }
    Some(key)
}

/// Sort key for snapshot ids: timestamp, then collision counter
pub(crate) fn ordering_key(snapshot_id: &str) -> (&str, u32) {
    let timestamp = snapshot_id.split('-').next().unwrap_or("");
    let counter = snapshot_id
        .splitn(4, '-')
        .nth(3)
        .and_then(|n| n.parse().ok())
        .unwrap_or(1);
    (timestamp, counter)
}
