//! Plex Media Server as a library source

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use shelf_sync::{ItemPage, LibrarySource, MediaPayload, SectionInfo, SourceError, SourceItem};

use crate::config::PlexConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const TOKEN_HEADER: &str = "X-Plex-Token";
const CONTAINER_START: &str = "X-Plex-Container-Start";
const CONTAINER_SIZE: &str = "X-Plex-Container-Size";

/// Artwork fields mirrored for every item
const MEDIA_KINDS: [&str; 3] = ["thumb", "art", "banner"];

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(rename = "MediaContainer")]
    container: T,
}

#[derive(Debug, Deserialize)]
struct SectionsContainer {
    #[serde(rename = "Directory", default)]
    directories: Vec<Directory>,
}

#[derive(Debug, Deserialize)]
struct Directory {
    key: String,
    #[serde(default)]
    title: String,
    #[serde(rename = "type", default)]
    kind: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ItemsContainer {
    #[serde(default)]
    total_size: Option<u64>,
    #[serde(default)]
    size: u64,
    #[serde(rename = "Metadata", default)]
    metadata: Vec<Value>,
}

pub struct PlexSource {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl PlexSource {
    pub fn new(config: &PlexConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let response = request
            .header(ACCEPT, "application/json")
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Request(format!("HTTP {}", status)));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| SourceError::Decode(e.to_string()))
    }
}

/// Local group a section is mirrored into
pub fn section_group(key: &str) -> String {
    let key: String = key
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    format!("plex-{}", key)
}

/// Turn one `Metadata` entry into a source item.
///
/// An entry without a usable `ratingKey` keeps its place in the page with an
/// empty id, so page lengths and offsets stay aligned with the server; the
/// engine skips it as an invalid id.
fn parse_item(entry: Value) -> SourceItem {
    let id = match entry.get("ratingKey") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let tick = entry
        .get("updatedAt")
        .or_else(|| entry.get("addedAt"))
        .and_then(Value::as_u64)
        .unwrap_or(0);

    let media: BTreeMap<String, String> = MEDIA_KINDS
        .iter()
        .filter_map(|kind| {
            let reference = entry.get(*kind)?.as_str()?;
            Some((kind.to_string(), reference.to_string()))
        })
        .collect();

    SourceItem {
        id,
        tick,
        media,
        payload: entry,
    }
}

#[async_trait]
impl LibrarySource for PlexSource {
    fn source_id(&self) -> String {
        self.base_url.clone()
    }

    async fn sections(&self) -> Result<Vec<SectionInfo>, SourceError> {
        let envelope: Envelope<SectionsContainer> = self
            .get_json(self.client.get(self.url("/library/sections")))
            .await?;

        Ok(envelope
            .container
            .directories
            .into_iter()
            .map(|directory| SectionInfo {
                group: section_group(&directory.key),
                key: directory.key,
                title: directory.title,
                kind: directory.kind,
            })
            .collect())
    }

    async fn list_items(
        &self,
        section: &SectionInfo,
        start: usize,
        size: usize,
    ) -> Result<ItemPage, SourceError> {
        let request = self
            .client
            .get(self.url(&format!("/library/sections/{}/all", section.key)))
            .header(CONTAINER_START, start.to_string())
            .header(CONTAINER_SIZE, size.to_string());
        let envelope: Envelope<ItemsContainer> = self.get_json(request).await?;

        let container = envelope.container;
        debug!(
            "Plex section {} at {}: {} of {:?}",
            section.key, start, container.size, container.total_size
        );

        // Without totalSize the page itself is all we can vouch for
        let total_count = container
            .total_size
            .unwrap_or(start as u64 + container.metadata.len() as u64);

        Ok(ItemPage {
            items: container.metadata.into_iter().map(parse_item).collect(),
            total_count,
        })
    }

    async fn download(&self, reference: &str) -> Result<MediaPayload, SourceError> {
        let response = self
            .client
            .get(self.url(reference))
            .header(TOKEN_HEADER, &self.token)
            .send()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(SourceError::NotFound(reference.to_string()));
        }
        if !status.is_success() {
            return Err(SourceError::Request(format!("HTTP {} for {}", status, reference)));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes: Bytes = response
            .bytes()
            .await
            .map_err(|e| SourceError::Request(e.to_string()))?;

        Ok(MediaPayload { content_type, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_item() {
        let item = parse_item(json!({
            "ratingKey": "42",
            "title": "Hades",
            "updatedAt": 1700000000u64,
            "thumb": "/library/metadata/42/thumb/1700000000",
            "art": "/library/metadata/42/art/1690000000",
        }));

        assert_eq!(item.id, "42");
        assert_eq!(item.tick, 1700000000);
        assert_eq!(item.media.len(), 2);
        assert_eq!(item.payload["title"], "Hades");

        let keyless = parse_item(json!({"title": "no key"}));
        assert!(keyless.id.is_empty());
        assert_eq!(keyless.payload["title"], "no key");
    }

    #[test]
    fn test_items_container_decoding() {
        let envelope: Envelope<ItemsContainer> = serde_json::from_value(json!({
            "MediaContainer": {
                "size": 1,
                "totalSize": 250,
                "Metadata": [{"ratingKey": 7, "addedAt": 5}]
            }
        }))
        .unwrap();

        assert_eq!(envelope.container.total_size, Some(250));
        let item = parse_item(envelope.container.metadata[0].clone());
        assert_eq!(item.id, "7");
        assert_eq!(item.tick, 5);
    }

    #[test]
    fn test_keyless_entry_keeps_page_length() {
        let envelope: Envelope<ItemsContainer> = serde_json::from_value(json!({
            "MediaContainer": {
                "size": 3,
                "totalSize": 3,
                "Metadata": [{"ratingKey": "a"}, {"title": "no key"}, {"ratingKey": "b"}]
            }
        }))
        .unwrap();

        let items: Vec<SourceItem> = envelope
            .container
            .metadata
            .into_iter()
            .map(parse_item)
            .collect();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].id, "a");
        assert!(items[1].id.is_empty());
        assert_eq!(items[2].id, "b");
    }

    #[test]
    fn test_section_group() {
        assert_eq!(section_group("3"), "plex-3");
        assert_eq!(section_group("../3"), "plex-3");
    }
}
