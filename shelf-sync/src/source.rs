//! The authoritative library a pull sync scans

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Asset not found: {0}")]
    NotFound(String),
}

/// A section (group) of the remote library
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo {
    /// Local group name the section is mirrored into
    pub group: String,
    /// Identifier the source uses for listing
    pub key: String,
    pub title: String,
    pub kind: String,
}

/// One entity as reported by the source
#[derive(Debug, Clone)]
pub struct SourceItem {
    pub id: String,
    /// Last-modified tick
    pub tick: u64,
    /// media kind -> reference the asset can be downloaded from
    pub media: BTreeMap<String, String>,
    /// Full document stored verbatim
    pub payload: Value,
}

/// One page of a section listing.
///
/// `items` holds every entry the source returned for the page, including ones
/// without a usable id: its length drives pagination.
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    pub items: Vec<SourceItem>,
    /// Total number of items the source holds in the section
    pub total_count: u64,
}

#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub content_type: String,
    pub bytes: Bytes,
}

/// A paginated remote library.
///
/// Pages are requested sequentially per section; `download` may be called
/// concurrently.
#[async_trait]
pub trait LibrarySource: Send + Sync {
    /// Identifies the source in the snapshot (usually its base URL)
    fn source_id(&self) -> String;

    async fn sections(&self) -> Result<Vec<SectionInfo>, SourceError>;

    async fn list_items(
        &self,
        section: &SectionInfo,
        start: usize,
        size: usize,
    ) -> Result<ItemPage, SourceError>;

    async fn download(&self, reference: &str) -> Result<MediaPayload, SourceError>;
}

/// Version of a media reference.
///
/// Media servers append the asset's change stamp as the last path segment
/// (`/library/metadata/42/thumb/1700000000`). References without one fall back
/// to a stable digest of the reference so a changed URL still counts as a change.
pub fn media_version(reference: &str) -> u64 {
    let path = reference.split(|c: char| c == '?' || c == '#').next().unwrap_or("");
    let last = path.trim_end_matches('/').rsplit('/').next().unwrap_or("");

    if !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()) {
        if let Ok(version) = last.parse::<u64>() {
            return version;
        }
    }

    let digest = blake3::hash(reference.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_be_bytes(prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_media_version_trailing_segment() {
        assert_eq!(media_version("/library/metadata/42/thumb/1700000000"), 1700000000);
        assert_eq!(media_version("/library/metadata/42/art/12/"), 12);
        assert_eq!(media_version("/library/metadata/42/thumb/99?X-Plex-Token=abc"), 99);
    }

    #[test]
    fn test_media_version_fallback_is_stable() {
        let a = media_version("/images/cover.jpg");
        assert_eq!(a, media_version("/images/cover.jpg"));
        assert_ne!(a, media_version("/images/cover2.jpg"));
    }
}
