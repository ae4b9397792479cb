//! Content hashing
//!
//! Content hashes are SHA-256 digests over the exact bytes of a document,
//! rendered as `sha256:<64 lowercase hex>`. They are the version identifier
//! used for compare-and-swap writes, index entries, snapshot ids and the
//! resolver cache.
//!
//! Snapshot records additionally carry a CRC32 checksum (`crc32:<8 hex>`)
//! so a torn or bit-flipped history record is detected on read.

use std::fmt;

use crc32fast::Hasher as Crc32;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const HASH_PREFIX: &str = "sha256:";
const CHECKSUM_PREFIX: &str = "crc32:";

/// Digest of a document's bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentHash(String);

impl ContentHash {
    /// Parses a formatted hash (`sha256:<64 hex>`), accepting uppercase hex
    pub fn parse(formatted: &str) -> Option<Self> {
        let hex = formatted.strip_prefix(HASH_PREFIX)?;
        if hex.len() != 64 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(Self(format!("{}{}", HASH_PREFIX, hex.to_ascii_lowercase())))
    }

    /// The full formatted digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex digest without the algorithm prefix
    pub fn hex(&self) -> &str {
        self.0.strip_prefix(HASH_PREFIX).unwrap_or(&self.0)
    }

    /// First 12 hex characters, for ids and log lines
    pub fn short(&self) -> &str {
        let hex = self.hex();
        hex.get(..12).unwrap_or(hex)
    }
}

impl TryFrom<String> for ContentHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("malformed content hash '{}'", value))
    }
}

impl From<ContentHash> for String {
    fn from(hash: ContentHash) -> Self {
        hash.0
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ContentHash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Deterministic content hasher
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher;

impl ContentHasher {
    /// SHA-256 digest over the exact bytes
    pub fn hash(content: &[u8]) -> ContentHash {
        let mut hasher = Sha256::new();
        hasher.update(content);
        ContentHash(format!("{}{:x}", HASH_PREFIX, hasher.finalize()))
    }

    /// Convenience for text content
    pub fn hash_str(content: &str) -> ContentHash {
        Self::hash(content.as_bytes())
    }

    /// 16-hex key derived from a document name; used to shard history
    pub fn name_key(name: &str) -> String {
        Self::hash_str(name).hex()[..16].to_string()
    }
}

/// CRC32 (IEEE) over `data`, formatted `crc32:XXXXXXXX`
pub fn record_checksum(data: &[u8]) -> String {
    let mut hasher = Crc32::new();
    hasher.update(data);
    format!("{}{:08x}", CHECKSUM_PREFIX, hasher.finalize())
}

/// Parses a formatted record checksum back to its value
pub fn parse_record_checksum(formatted: &str) -> Option<u32> {
    let stripped = formatted.strip_prefix(CHECKSUM_PREFIX)?;
    if stripped.len() != 8 {
        return None;
    }
    u32::from_str_radix(stripped, 16).ok()
}
