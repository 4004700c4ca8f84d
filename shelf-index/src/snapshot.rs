//! Versioned snapshot of what the last sync observed
//!
//! A snapshot maps `group:id` to the entity's version tick and
//! `group:id:kind` to the media version. Those two maps are the only thing
//! consulted to decide whether something changed; payloads are never diffed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::errors::Result;

/// Per-group metadata recorded by a scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SectionMeta {
    pub title: String,
    #[serde(rename = "Type")]
    pub kind: String,
    /// Highest item tick seen in this group
    pub tick: u64,
    pub count: u64,
}

/// A point-in-time record of entity and media versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Snapshot {
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub source: String,
    /// Highest item tick seen across all groups
    #[serde(default)]
    pub db_ticks: u64,
    #[serde(default)]
    pub sections: BTreeMap<String, SectionMeta>,
    #[serde(default)]
    pub db_versions: BTreeMap<String, u64>,
    #[serde(default)]
    pub media_versions: BTreeMap<String, u64>,
}

/// Snapshot key for an entity
pub fn db_key(group: &str, id: &str) -> String {
    format!("{}:{}", group, id)
}

/// Snapshot key for one media kind of an entity
pub fn media_key(group: &str, id: &str, kind: &str) -> String {
    format!("{}:{}:{}", group, id, kind)
}

/// Split a `group:id` key
pub fn parse_db_key(key: &str) -> Option<(&str, &str)> {
    let (group, id) = key.split_once(':')?;
    if group.is_empty() || id.is_empty() || id.contains(':') {
        return None;
    }
    Some((group, id))
}

/// Split a `group:id:kind` key
pub fn parse_media_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.splitn(3, ':');
    let group = parts.next()?;
    let id = parts.next()?;
    let kind = parts.next()?;
    if group.is_empty() || id.is_empty() || kind.is_empty() || kind.contains(':') {
        return None;
    }
    Some((group, id, kind))
}

impl Snapshot {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            updated_at: Utc::now(),
            source: source.into(),
            db_ticks: 0,
            sections: BTreeMap::new(),
            db_versions: BTreeMap::new(),
            media_versions: BTreeMap::new(),
        }
    }

    /// Record an entity version, keeping section and global tick maxima current
    pub fn record_item(&mut self, group: &str, id: &str, tick: u64) {
        let previous = self.db_versions.insert(db_key(group, id), tick);
        let section = self.sections.entry(group.to_string()).or_default();
        if previous.is_none() {
            section.count += 1;
        }
        section.tick = section.tick.max(tick);
        self.db_ticks = self.db_ticks.max(tick);
    }

    pub fn record_media(&mut self, group: &str, id: &str, kind: &str, version: u64) {
        self.media_versions.insert(media_key(group, id, kind), version);
    }

    pub fn db_version(&self, group: &str, id: &str) -> Option<u64> {
        self.db_versions.get(&db_key(group, id)).copied()
    }

    /// Ids recorded for a group
    pub fn ids_in_group<'a>(&'a self, group: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.db_versions
            .keys()
            .filter_map(move |key| match parse_db_key(key) {
                Some((g, id)) if g == group => Some(id),
                _ => None,
            })
    }

    /// Whether both snapshots record identical versions and sections
    /// (`UpdatedAt` ignored)
    pub fn same_versions(&self, other: &Snapshot) -> bool {
        self.db_versions == other.db_versions
            && self.media_versions == other.media_versions
            && self.sections == other.sections
            && self.db_ticks == other.db_ticks
    }
}

/// Cheap change signal for a snapshot file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotStamp {
    pub modified: SystemTime,
    pub len: u64,
}

/// The on-disk home of one sync target's snapshot.
///
/// `commit` writes to a hidden temp file in the same directory and renames it
/// over the final path, so a reader sees either the previous snapshot or the
/// new one, never a torn write.
#[derive(Debug, Clone)]
pub struct VersionedSnapshot {
    path: PathBuf,
    fsync: bool,
}

impl VersionedSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fsync: true,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last committed snapshot.
    ///
    /// A missing or unreadable file means "no prior state" and yields `None`.
    pub async fn load(&self) -> Option<Snapshot> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Failed to read snapshot {}: {}", self.path.display(), e);
                return None;
            }
        };

        match serde_json::from_slice::<Snapshot>(&data) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!(
                    "Ignoring unparsable snapshot {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Replace the snapshot atomically
    pub async fn commit(&self, snapshot: &Snapshot) -> Result<()> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        shelf_media::write_atomic(&self.path, &data, self.fsync).await?;

        info!(
            "Committed snapshot {} ({} entities, {} media)",
            self.path.display(),
            snapshot.db_versions.len(),
            snapshot.media_versions.len()
        );
        Ok(())
    }

    /// Modification stamp of the snapshot file, `None` when absent
    pub async fn stamp(&self) -> Option<SnapshotStamp> {
        let meta = fs::metadata(&self.path).await.ok()?;
        Some(SnapshotStamp {
            modified: meta.modified().ok()?,
            len: meta.len(),
        })
    }
}
