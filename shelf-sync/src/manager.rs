//! Entry point tying stores, reconcilers, caches and guards together

use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shelf_index::{
    ClientManifest, DeltaResult, DocumentStore, Snapshot, UpsertStatus, VersionedSnapshot,
};
use shelf_media::{FsyncPolicy, MediaStore, MediaStoreConfig, PutOutcome};

use crate::cache::CollectionCache;
use crate::config::SyncConfig;
use crate::errors::{Result, SyncError};
use crate::guard::SingleFlightGuard;
use crate::pull::{PullReconciler, PullReport};
use crate::push::PushReconciler;
use crate::source::LibrarySource;

/// Main sync manager.
///
/// One pull per target and one push delta per client may run at a time;
/// different targets and clients proceed in parallel.
pub struct SyncManager {
    config: SyncConfig,
    documents: DocumentStore,
    media: MediaStore,
    push: PushReconciler,
    guard: SingleFlightGuard,
    caches: RwLock<HashMap<String, Arc<CollectionCache>>>,
    last_reports: RwLock<HashMap<String, PullReport>>,
}

impl SyncManager {
    /// Create the manager, preparing the data directories
    pub async fn new(config: SyncConfig) -> Result<Self> {
        let fsync_policy = if config.fsync {
            FsyncPolicy::Always
        } else {
            FsyncPolicy::Never
        };
        let media = MediaStore::new_with_config(
            config.media_root(),
            MediaStoreConfig {
                fsync_policy,
                ..Default::default()
            },
        )
        .await?;
        tokio::fs::create_dir_all(config.snapshot_dir()).await?;

        let documents = DocumentStore::new(&config.data_root).with_fsync(config.fsync);
        let push = PushReconciler::new(
            documents.clone(),
            media.clone(),
            config.allowed_groups.clone(),
        );

        info!("Sync manager ready at {}", config.data_root.display());

        Ok(Self {
            config,
            documents,
            media,
            push,
            guard: SingleFlightGuard::new(),
            caches: RwLock::new(HashMap::new()),
            last_reports: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn guard(&self) -> &SingleFlightGuard {
        &self.guard
    }

    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    fn versioned_snapshot(&self, target: &str) -> Result<VersionedSnapshot> {
        Ok(VersionedSnapshot::new(self.config.snapshot_path(target)?).with_fsync(self.config.fsync))
    }

    /// Run a pull pass for `target`. A pass already running for it is `Locked`.
    pub async fn pull<S>(&self, target: &str, source: Arc<S>) -> Result<PullReport>
    where
        S: LibrarySource + ?Sized,
    {
        let snapshot = self.versioned_snapshot(target)?;
        let _permit = self.guard.acquire(&format!("pull:{}", target))?;

        let reconciler = PullReconciler::new(
            source,
            self.documents.clone(),
            self.media.clone(),
            snapshot,
            self.config.pull_config(),
        );

        match reconciler.run().await {
            Ok(report) => {
                self.last_reports
                    .write()
                    .await
                    .insert(target.to_string(), report.clone());
                Ok(report)
            }
            Err(e) => {
                warn!("Pull for {} failed: {}", target, e);
                Err(e)
            }
        }
    }

    /// Compare a client's inventory against the stored documents
    pub async fn push_delta(&self, client: &str, manifest: &ClientManifest) -> Result<DeltaResult> {
        let _permit = self.guard.acquire(&format!("push:{}", client))?;
        debug!("Computing push delta for {}", client);
        self.push.compute_delta(manifest).await
    }

    pub async fn upsert_entity(
        &self,
        group: &str,
        id: &str,
        document: &Value,
    ) -> Result<UpsertStatus> {
        self.push.upsert_entity(group, id, document).await
    }

    pub async fn delete_entity(&self, group: &str, id: &str) -> Result<bool> {
        self.push.delete_entity(group, id).await
    }

    pub async fn read_entity(&self, group: &str, id: &str) -> Result<Option<Value>> {
        self.push.read_entity(group, id).await
    }

    pub async fn put_media(
        &self,
        relative: &str,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<PutOutcome> {
        self.push.put_media(relative, data, expected_hash).await
    }

    pub async fn get_media(&self, relative: &str) -> Result<PathBuf> {
        self.push.get_media(relative).await
    }

    pub async fn read_media(&self, relative: &str) -> Result<Bytes> {
        self.push.read_media(relative).await
    }

    /// Cached rows of a group, coherent with `target`'s snapshot commits
    pub async fn list(&self, target: &str, group: &str) -> Result<Arc<Vec<Value>>> {
        self.cache(target).await?.list(group).await
    }

    async fn cache(&self, target: &str) -> Result<Arc<CollectionCache>> {
        if let Some(cache) = self.caches.read().await.get(target) {
            return Ok(Arc::clone(cache));
        }

        let snapshot = self.versioned_snapshot(target)?;
        let mut caches = self.caches.write().await;
        let cache = caches
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CollectionCache::new(self.documents.clone(), snapshot)));
        Ok(Arc::clone(cache))
    }

    /// Last committed snapshot of a target
    pub async fn snapshot(&self, target: &str) -> Result<Snapshot> {
        self.versioned_snapshot(target)?
            .load()
            .await
            .ok_or_else(|| SyncError::NotFound(format!("snapshot for {}", target)))
    }

    /// Report of the last successful pull of a target in this process
    pub async fn last_report(&self, target: &str) -> Option<PullReport> {
        self.last_reports.read().await.get(target).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;
    use serde_json::json;
    use tempfile::TempDir;

    async fn manager(dir: &TempDir) -> SyncManager {
        let mut config = SyncConfig::with_data_root(dir.path());
        config.fsync = false;
        SyncManager::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn test_push_delta_locked_while_held() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir).await;

        let permit = manager.guard().acquire("push:laptop").unwrap();
        let err = manager
            .push_delta("laptop", &ClientManifest::default())
            .await
            .unwrap_err();
        assert_eq!(err.class(), ErrorClass::Locked);

        // Another client is unaffected
        assert!(manager.push_delta("desktop", &ClientManifest::default()).await.is_ok());

        drop(permit);
        assert!(manager.push_delta("laptop", &ClientManifest::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_snapshot_is_not_found() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir).await;

        let err = manager.snapshot("plex").await.unwrap_err();
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert_eq!(manager.snapshot("../x").await.unwrap_err().class(), ErrorClass::InvalidInput);
    }

    #[tokio::test]
    async fn test_list_through_cache() {
        let temp_dir = TempDir::new().unwrap();
        let manager = manager(&temp_dir).await;

        manager
            .upsert_entity("games", "1", &json!({"Name": "Hades"}))
            .await
            .unwrap();

        let rows = manager.list("plex", "games").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(manager.read_entity("games", "1").await.unwrap().unwrap()["Name"], "Hades");
    }
}
