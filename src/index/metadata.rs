//! Per-document metadata records

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hashing::{ContentHash, ContentHasher};
use crate::markdown::{estimate_tokens, parse_sections, LinkExtractor, LinkRef, Section, TransclusionRef};

/// Cached facts about one tracked document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    /// Absolute on-disk path
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: u64,
    pub token_count: u64,
    /// Hash of the bytes on disk as of the last core-mediated write or scan
    pub content_hash: Option<ContentHash>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub links: Vec<LinkRef>,
    #[serde(default)]
    pub transclusions: Vec<TransclusionRef>,
    #[serde(default)]
    pub read_count: u64,
    #[serde(default)]
    pub last_access: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied to `MetadataIndex::upsert`.
///
/// `None` for sections, links or transclusions keeps the stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub path: PathBuf,
    pub exists: bool,
    pub size_bytes: u64,
    pub token_count: u64,
    pub content_hash: Option<ContentHash>,
    pub sections: Option<Vec<Section>>,
    pub links: Option<Vec<LinkRef>>,
    pub transclusions: Option<Vec<TransclusionRef>>,
}

impl MetadataUpdate {
    /// Derive every field from the document's current content
    pub fn from_content(path: PathBuf, content: &str, extractor: &LinkExtractor) -> Self {
        Self {
            path,
            exists: true,
            size_bytes: content.len() as u64,
            token_count: estimate_tokens(content),
            content_hash: Some(ContentHasher::hash_str(content)),
            sections: Some(parse_sections(content)),
            links: Some(extractor.parse_links(content)),
            transclusions: Some(extractor.parse_transclusions(content)),
        }
    }

    /// Update for a document that is no longer on disk
    pub fn missing(path: PathBuf) -> Self {
        Self {
            path,
            exists: false,
            size_bytes: 0,
            token_count: 0,
            content_hash: None,
            sections: Some(Vec::new()),
            links: Some(Vec::new()),
            transclusions: Some(Vec::new()),
        }
    }
}

impl DocumentMetadata {
    pub(crate) fn from_update(update: MetadataUpdate, now: DateTime<Utc>) -> Self {
        Self {
            path: update.path,
            exists: update.exists,
            size_bytes: update.size_bytes,
            token_count: update.token_count,
            content_hash: update.content_hash,
            sections: update.sections.unwrap_or_default(),
            links: update.links.unwrap_or_default(),
            transclusions: update.transclusions.unwrap_or_default(),
            read_count: 0,
            last_access: None,
            updated_at: now,
        }
    }

    /// Apply an update, keeping access statistics
    pub(crate) fn apply(&mut self, update: MetadataUpdate, now: DateTime<Utc>) {
        self.path = update.path;
        self.exists = update.exists;
        self.size_bytes = update.size_bytes;
        self.token_count = update.token_count;
        self.content_hash = update.content_hash;
        if let Some(sections) = update.sections {
            self.sections = sections;
        }
        if let Some(links) = update.links {
            self.links = links;
        }
        if let Some(transclusions) = update.transclusions {
            self.transclusions = transclusions;
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_content() {
        let extractor = LinkExtractor::new();
        let content = "# Brief\nSee [ctx](active.md).\n{{include:tech.md#Stack}}\n";
        let update = MetadataUpdate::from_content(PathBuf::from("/r/brief.md"), content, &extractor);

        assert!(update.exists);
        assert_eq!(update.size_bytes, content.len() as u64);
        assert_eq!(update.content_hash, Some(ContentHasher::hash_str(content)));
        assert_eq!(update.sections.as_ref().unwrap()[0].title, "Brief");
        assert_eq!(update.links.as_ref().unwrap()[0].target, "active.md");
        assert_eq!(
            update.transclusions.as_ref().unwrap()[0].anchor.as_deref(),
            Some("Stack")
        );
    }

    #[test]
    fn test_apply_keeps_access_stats_and_unspecified_fields() {
        let extractor = LinkExtractor::new();
        let now = Utc::now();
        let mut meta = DocumentMetadata::from_update(
            MetadataUpdate::from_content(PathBuf::from("/r/a.md"), "# A\n[b](b.md)\n", &extractor),
            now,
        );
        meta.read_count = 3;

        let mut update = MetadataUpdate::from_content(PathBuf::from("/r/a.md"), "# A2\n", &extractor);
        update.links = None;
        meta.apply(update, now);

        assert_eq!(meta.read_count, 3);
        assert_eq!(meta.sections[0].title, "A2");
        assert_eq!(meta.links.len(), 1);
    }

    #[test]
    fn test_missing_update() {
        let update = MetadataUpdate::missing(PathBuf::from("/r/gone.md"));
        assert!(!update.exists);
        assert!(update.content_hash.is_none());
    }
}
