use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use shelf_index::{validate_group_name, GroupAllowList};

use crate::errors::Result;
use crate::pull::PullConfig;

/// Sync engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Root for documents, media and snapshots
    pub data_root: PathBuf,
    pub page_size: usize,
    pub media_workers: usize,
    pub max_pages_per_section: usize,
    pub allowed_groups: GroupAllowList,
    /// Flush files to disk before renaming them into place
    pub fsync: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let pull = PullConfig::default();
        Self {
            data_root: PathBuf::from("data"),
            page_size: pull.page_size,
            media_workers: pull.media_workers,
            max_pages_per_section: pull.max_pages_per_section,
            allowed_groups: GroupAllowList::default(),
            fsync: true,
        }
    }
}

impl SyncConfig {
    pub fn with_data_root(data_root: impl Into<PathBuf>) -> Self {
        Self {
            data_root: data_root.into(),
            ..Default::default()
        }
    }

    pub fn media_root(&self) -> PathBuf {
        self.data_root.join("media")
    }

    pub fn snapshot_dir(&self) -> PathBuf {
        self.data_root.join("snapshots")
    }

    /// Snapshot file of one pull target
    pub fn snapshot_path(&self, target: &str) -> Result<PathBuf> {
        validate_group_name(target)?;
        Ok(self.snapshot_dir().join(format!("{}.json", target)))
    }

    pub fn pull_config(&self) -> PullConfig {
        PullConfig {
            page_size: self.page_size,
            media_workers: self.media_workers,
            max_pages_per_section: self.max_pages_per_section,
        }
    }
}
