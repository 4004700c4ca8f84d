use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Inventory reported by a client that owns the authoritative copy
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientManifest {
    /// group -> ids the client holds
    #[serde(default)]
    pub json: BTreeMap<String, Vec<String>>,
    /// group -> id -> client version string
    #[serde(default)]
    pub versions: BTreeMap<String, BTreeMap<String, String>>,
    /// media folder -> number of files the client holds in it
    #[serde(default)]
    pub media_folders: BTreeMap<String, u64>,
}

impl ClientManifest {
    pub fn version_of(&self, group: &str, id: &str) -> Option<&str> {
        self.versions.get(group)?.get(id).map(String::as_str)
    }

    /// Every group named anywhere in the manifest
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        let mut groups: Vec<&str> = self
            .json
            .keys()
            .chain(self.versions.keys())
            .map(String::as_str)
            .collect();
        groups.sort_unstable();
        groups.dedup();
        groups.into_iter()
    }
}

/// Media repairs a client should perform
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDelta {
    #[serde(default)]
    pub upload_folders: Vec<String>,
}

/// What a client must upload and what the server holds that the client dropped
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaResult {
    #[serde(default)]
    pub to_upsert: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub to_delete: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub media: MediaDelta,
}

impl DeltaResult {
    pub fn is_empty(&self) -> bool {
        self.to_upsert.values().all(Vec::is_empty)
            && self.to_delete.values().all(Vec::is_empty)
            && self.media.upload_folders.is_empty()
    }

    pub fn upsert_count(&self) -> usize {
        self.to_upsert.values().map(Vec::len).sum()
    }

    pub fn delete_count(&self) -> usize {
        self.to_delete.values().map(Vec::len).sum()
    }
}
