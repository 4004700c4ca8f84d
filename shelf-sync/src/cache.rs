//! Read-through cache of collection contents
//!
//! Entries are keyed by group and tagged with the [`SnapshotStamp`] observed
//! when they were built. A read rebuilds the entry whenever the stamp moved,
//! so a snapshot commit invalidates every group at once. Document writes that
//! are not followed by a commit stay invisible until the next one; callers
//! needing read-after-write go to the [`DocumentStore`] directly.

use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use shelf_index::{validate_group, DocumentStore, SnapshotStamp, VersionedSnapshot};

use crate::errors::Result;

#[derive(Debug)]
struct CacheEntry {
    rows: Arc<Vec<Value>>,
    stamp: Option<SnapshotStamp>,
}

#[derive(Debug)]
pub struct CollectionCache {
    documents: DocumentStore,
    snapshot: VersionedSnapshot,
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl CollectionCache {
    pub fn new(documents: DocumentStore, snapshot: VersionedSnapshot) -> Self {
        Self {
            documents,
            snapshot,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Rows of a group, flattened one level when a document is itself an array.
    ///
    /// A missing group directory yields an empty list.
    pub async fn list(&self, group: &str) -> Result<Arc<Vec<Value>>> {
        validate_group(group)?;
        let stamp = self.snapshot.stamp().await;

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(group) {
                if entry.stamp == stamp {
                    return Ok(Arc::clone(&entry.rows));
                }
            }
        }

        let documents = self.documents.load_group(group).await?;
        let mut rows = Vec::with_capacity(documents.len());
        for document in documents {
            match document {
                Value::Array(items) => rows.extend(items),
                other => rows.push(other),
            }
        }
        debug!("Rebuilt cache for {} with {} rows", group, rows.len());

        let rows = Arc::new(rows);
        self.entries.write().await.insert(
            group.to_string(),
            CacheEntry {
                rows: Arc::clone(&rows),
                stamp,
            },
        );
        Ok(rows)
    }

    pub async fn invalidate(&self, group: &str) -> bool {
        self.entries.write().await.remove(group).is_some()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    pub async fn cached_groups(&self) -> usize {
        self.entries.read().await.len()
    }
}
