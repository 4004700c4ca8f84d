//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use shelfsync::sync::{
    ItemPage, LibrarySource, MediaPayload, SectionInfo, SourceError, SourceItem, SyncConfig,
    SyncManager,
};

/// In-memory library with failure injection
#[derive(Default)]
pub struct FakeSource {
    state: Mutex<FakeState>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

#[derive(Default)]
struct FakeState {
    /// group -> id -> item, in insertion order of ids
    sections: BTreeMap<String, BTreeMap<String, SourceItem>>,
    /// references whose download fails
    broken_media: HashSet<String>,
    /// page offset at which listing fails
    fail_listing_at: Option<usize>,
    /// pretend sections hold more items than they return
    inflate_total: u64,
    /// how long each download takes
    download_delay: Option<Duration>,
    downloads: usize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, group: &str, id: &str, tick: u64, kinds: &[&str]) {
        let media = kinds
            .iter()
            .map(|kind| {
                (
                    kind.to_string(),
                    format!("/library/metadata/{}/{}/{}", id, kind, tick),
                )
            })
            .collect();
        let item = SourceItem {
            id: id.to_string(),
            tick,
            media,
            payload: json!({"id": id, "group": group, "tick": tick}),
        };
        self.state
            .lock()
            .unwrap()
            .sections
            .entry(group.to_string())
            .or_default()
            .insert(id.to_string(), item);
    }

    pub fn remove(&self, group: &str, id: &str) {
        if let Some(items) = self.state.lock().unwrap().sections.get_mut(group) {
            items.remove(id);
        }
    }

    /// Make the download of `id`'s `kind` at `tick` fail
    pub fn break_media(&self, id: &str, kind: &str, tick: u64) {
        self.state
            .lock()
            .unwrap()
            .broken_media
            .insert(format!("/library/metadata/{}/{}/{}", id, kind, tick));
    }

    pub fn fix_media(&self) {
        self.state.lock().unwrap().broken_media.clear();
    }

    pub fn fail_listing_at(&self, start: Option<usize>) {
        self.state.lock().unwrap().fail_listing_at = start;
    }

    pub fn inflate_total(&self, extra: u64) {
        self.state.lock().unwrap().inflate_total = extra;
    }

    pub fn set_download_delay(&self, delay: Duration) {
        self.state.lock().unwrap().download_delay = Some(delay);
    }

    pub fn downloads(&self) -> usize {
        self.state.lock().unwrap().downloads
    }

    /// Most downloads ever running at the same time
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LibrarySource for FakeSource {
    fn source_id(&self) -> String {
        "fake://library".to_string()
    }

    async fn sections(&self) -> Result<Vec<SectionInfo>, SourceError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .sections
            .keys()
            .map(|group| SectionInfo {
                group: group.clone(),
                key: group.clone(),
                title: group.to_uppercase(),
                kind: "game".to_string(),
            })
            .collect())
    }

    async fn list_items(
        &self,
        section: &SectionInfo,
        start: usize,
        size: usize,
    ) -> Result<ItemPage, SourceError> {
        let state = self.state.lock().unwrap();
        if state.fail_listing_at == Some(start) {
            return Err(SourceError::Request("listing timed out".to_string()));
        }
        let items = state.sections.get(&section.key).cloned().unwrap_or_default();
        Ok(ItemPage {
            total_count: items.len() as u64 + state.inflate_total,
            items: items.into_values().skip(start).take(size).collect(),
        })
    }

    async fn download(&self, reference: &str) -> Result<MediaPayload, SourceError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.downloads += 1;
            if state.broken_media.contains(reference) {
                return Err(SourceError::Request(format!(
                    "connection reset fetching {}",
                    reference
                )));
            }
            state.download_delay
        };

        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        Ok(MediaPayload {
            content_type: "image/jpeg".to_string(),
            bytes: Bytes::from(format!("bytes of {}", reference)),
        })
    }
}

pub async fn manager(dir: &TempDir) -> SyncManager {
    let mut config = SyncConfig::with_data_root(dir.path());
    config.fsync = false;
    config.page_size = 2;
    SyncManager::new(config).await.unwrap()
}
