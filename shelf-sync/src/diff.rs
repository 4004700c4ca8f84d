//! Snapshot diff computation
//!
//! Compares the version maps of two snapshots to find which entities and media
//! assets must be written or removed to move the local store from the old
//! state to the new one.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use shelf_index::{parse_db_key, parse_media_key, Snapshot};

/// Type of change in a diff operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Present in the new snapshot only
    Added,
    /// Present in both with a different version
    Modified,
    /// Present in the old snapshot only
    Deleted,
}

impl ChangeType {
    pub fn is_upsert(&self) -> bool {
        matches!(self, ChangeType::Added | ChangeType::Modified)
    }
}

/// A changed entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityChange {
    pub key: String,
    pub group: String,
    pub id: String,
    pub change_type: ChangeType,
}

/// A changed media asset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChange {
    pub key: String,
    pub group: String,
    pub id: String,
    pub kind: String,
    pub change_type: ChangeType,
}

/// Statistics about a diff operation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub entities_added: usize,
    pub entities_modified: usize,
    pub entities_deleted: usize,
    pub media_added: usize,
    pub media_modified: usize,
    pub media_deleted: usize,
}

/// Result of diffing two snapshots, ordered by key
#[derive(Debug, Clone, Default)]
pub struct SnapshotDiff {
    pub entities: Vec<EntityChange>,
    pub media: Vec<MediaChange>,
    pub stats: DiffStats,
}

impl SnapshotDiff {
    /// Compute the changes that turn `old` into `new`.
    ///
    /// A missing old snapshot behaves like an empty one: everything is added.
    pub fn compute(old: Option<&Snapshot>, new: &Snapshot) -> Self {
        let mut diff = SnapshotDiff::default();

        let empty = BTreeMap::new();
        let old_db = old.map(|s| &s.db_versions).unwrap_or(&empty);
        let old_media = old.map(|s| &s.media_versions).unwrap_or(&empty);

        for (key, change_type) in version_changes(old_db, &new.db_versions) {
            let Some((group, id)) = parse_db_key(&key) else {
                debug!("Ignoring malformed snapshot key {}", key);
                continue;
            };
            match change_type {
                ChangeType::Added => diff.stats.entities_added += 1,
                ChangeType::Modified => diff.stats.entities_modified += 1,
                ChangeType::Deleted => diff.stats.entities_deleted += 1,
            }
            diff.entities.push(EntityChange {
                group: group.to_string(),
                id: id.to_string(),
                key,
                change_type,
            });
        }

        for (key, change_type) in version_changes(old_media, &new.media_versions) {
            let Some((group, id, kind)) = parse_media_key(&key) else {
                debug!("Ignoring malformed media key {}", key);
                continue;
            };
            match change_type {
                ChangeType::Added => diff.stats.media_added += 1,
                ChangeType::Modified => diff.stats.media_modified += 1,
                ChangeType::Deleted => diff.stats.media_deleted += 1,
            }
            diff.media.push(MediaChange {
                group: group.to_string(),
                id: id.to_string(),
                kind: kind.to_string(),
                key,
                change_type,
            });
        }

        debug!(
            "Snapshot diff: {} entity changes, {} media changes",
            diff.entities.len(),
            diff.media.len()
        );

        diff
    }

    pub fn has_changes(&self) -> bool {
        !self.entities.is_empty() || !self.media.is_empty()
    }

    /// `group:id` keys that must be written
    pub fn db_upserts(&self) -> BTreeSet<&str> {
        self.entities
            .iter()
            .filter(|c| c.change_type.is_upsert())
            .map(|c| c.key.as_str())
            .collect()
    }

    /// `group:id` keys that must be removed
    pub fn db_deletes(&self) -> BTreeSet<&str> {
        self.entities
            .iter()
            .filter(|c| c.change_type == ChangeType::Deleted)
            .map(|c| c.key.as_str())
            .collect()
    }

    pub fn media_upserts(&self) -> BTreeSet<&str> {
        self.media
            .iter()
            .filter(|c| c.change_type.is_upsert())
            .map(|c| c.key.as_str())
            .collect()
    }

    pub fn media_deletes(&self) -> BTreeSet<&str> {
        self.media
            .iter()
            .filter(|c| c.change_type == ChangeType::Deleted)
            .map(|c| c.key.as_str())
            .collect()
    }

    /// Ids to upsert and ids to delete within one group
    pub fn group_delta(&self, group: &str) -> (Vec<&str>, Vec<&str>) {
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();
        for change in self.entities.iter().filter(|c| c.group == group) {
            if change.change_type.is_upsert() {
                upserts.push(change.id.as_str());
            } else {
                deletes.push(change.id.as_str());
            }
        }
        (upserts, deletes)
    }

    /// Whether an entity is removed by this diff
    pub fn is_entity_deleted(&self, group: &str, id: &str) -> bool {
        self.entities
            .iter()
            .any(|c| c.change_type == ChangeType::Deleted && c.group == group && c.id == id)
    }
}

/// Owned key/change pairs between two version maps, in key order
fn version_changes(
    old: &BTreeMap<String, u64>,
    new: &BTreeMap<String, u64>,
) -> Vec<(String, ChangeType)> {
    let mut changes: Vec<(String, ChangeType)> = Vec::new();

    for (key, version) in new {
        match old.get(key) {
            None => changes.push((key.clone(), ChangeType::Added)),
            Some(previous) if previous != version => {
                changes.push((key.clone(), ChangeType::Modified))
            }
            Some(_) => {}
        }
    }
    for key in old.keys() {
        if !new.contains_key(key) {
            changes.push((key.clone(), ChangeType::Deleted));
        }
    }

    changes.sort_by(|a, b| a.0.cmp(&b.0));
    changes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(db: &[(&str, u64)], media: &[(&str, u64)]) -> Snapshot {
        let mut snapshot = Snapshot::new("test");
        for (key, version) in db {
            snapshot.db_versions.insert(key.to_string(), *version);
        }
        for (key, version) in media {
            snapshot.media_versions.insert(key.to_string(), *version);
        }
        snapshot
    }

    #[test]
    fn test_changed_and_added() {
        let old = snapshot(&[("g:1", 10), ("g:2", 20)], &[]);
        let new = snapshot(&[("g:1", 10), ("g:2", 21), ("g:3", 5)], &[]);

        let diff = SnapshotDiff::compute(Some(&old), &new);

        assert_eq!(diff.db_upserts().into_iter().collect::<Vec<_>>(), vec!["g:2", "g:3"]);
        assert!(diff.db_deletes().is_empty());
        assert_eq!(diff.stats.entities_added, 1);
        assert_eq!(diff.stats.entities_modified, 1);
    }

    #[test]
    fn test_deleted() {
        let old = snapshot(&[("g:1", 10), ("g:2", 20)], &[]);
        let new = snapshot(&[("g:1", 10)], &[]);

        let diff = SnapshotDiff::compute(Some(&old), &new);

        assert!(diff.db_upserts().is_empty());
        assert_eq!(diff.db_deletes().into_iter().collect::<Vec<_>>(), vec!["g:2"]);
        assert!(diff.is_entity_deleted("g", "2"));
    }

    #[test]
    fn test_no_old_snapshot_adds_everything() {
        let new = snapshot(&[("g:1", 1), ("h:2", 2)], &[("g:1:thumb", 7)]);
        let diff = SnapshotDiff::compute(None, &new);

        assert_eq!(diff.stats.entities_added, 2);
        assert_eq!(diff.stats.media_added, 1);
        assert_eq!(diff.media[0].kind, "thumb");
    }

    #[test]
    fn test_identical_snapshots_have_no_changes() {
        let old = snapshot(&[("g:1", 1)], &[("g:1:thumb", 7), ("g:1:art", 8)]);
        let new = old.clone();
        let diff = SnapshotDiff::compute(Some(&old), &new);
        assert!(!diff.has_changes());
        assert_eq!(diff.stats, DiffStats::default());
    }

    #[test]
    fn test_media_diff_per_kind() {
        let old = snapshot(&[("g:1", 1)], &[("g:1:thumb", 7), ("g:1:art", 8)]);
        let new = snapshot(&[("g:1", 1)], &[("g:1:thumb", 9), ("g:1:logo", 1)]);
        let diff = SnapshotDiff::compute(Some(&old), &new);

        assert!(diff.entities.is_empty());
        assert_eq!(
            diff.media_upserts().into_iter().collect::<Vec<_>>(),
            vec!["g:1:logo", "g:1:thumb"]
        );
        assert_eq!(diff.media_deletes().into_iter().collect::<Vec<_>>(), vec!["g:1:art"]);
    }

    #[test]
    fn test_group_delta_is_symmetric_difference_plus_changed() {
        let old = snapshot(&[("a:1", 1), ("a:2", 2), ("a:3", 3), ("b:1", 1)], &[]);
        let new = snapshot(&[("a:2", 2), ("a:3", 4), ("a:4", 1), ("b:1", 1)], &[]);
        let diff = SnapshotDiff::compute(Some(&old), &new);

        let (upserts, deletes) = diff.group_delta("a");
        assert_eq!(upserts, vec!["3", "4"]);
        assert_eq!(deletes, vec!["1"]);

        let (upserts, deletes) = diff.group_delta("b");
        assert!(upserts.is_empty() && deletes.is_empty());
    }
}
