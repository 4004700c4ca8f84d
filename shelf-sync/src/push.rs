//! Push reconciliation from a client-reported inventory
//!
//! The client owns the authoritative copy, so no snapshot is consulted: the
//! manifest is compared directly against the documents on disk. The result is
//! advisory; the client follows up with individual entity and media uploads.

use futures::future::join_all;
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use bytes::Bytes;
use serde_json::Value;
use shelf_index::{
    metadata_version, validate_id, ClientManifest, DeltaResult, DocumentStore, GroupAllowList,
    UpsertStatus,
};
use shelf_media::{MediaStore, PutOutcome};

use crate::errors::Result;

pub struct PushReconciler {
    documents: DocumentStore,
    media: MediaStore,
    allow_list: GroupAllowList,
}

impl PushReconciler {
    pub fn new(documents: DocumentStore, media: MediaStore, allow_list: GroupAllowList) -> Self {
        Self {
            documents,
            media,
            allow_list,
        }
    }

    pub fn allow_list(&self) -> &GroupAllowList {
        &self.allow_list
    }

    /// Work out what the client must upload and what it dropped.
    ///
    /// Every group and media folder is validated before anything is read; one
    /// bad name rejects the whole manifest. Invalid ids are skipped.
    pub async fn compute_delta(&self, manifest: &ClientManifest) -> Result<DeltaResult> {
        for group in manifest.groups() {
            self.allow_list.validate(group)?;
        }
        for folder in manifest.media_folders.keys() {
            self.media.resolve(folder)?;
        }

        let mut delta = DeltaResult::default();

        // Groups only named under `versions` carry no id list to diff against
        for (group, client_ids) in &manifest.json {
            let (to_upsert, to_delete) = self.group_delta(manifest, group, client_ids).await?;
            delta.to_upsert.insert(group.clone(), to_upsert);
            delta.to_delete.insert(group.clone(), to_delete);
        }

        for (folder, expected) in &manifest.media_folders {
            let present = self.media.folder_file_count(folder).await?;
            let missing = match present {
                None => true,
                Some(count) => (count as u64) < *expected,
            };
            if missing {
                debug!("Media folder {} needs upload ({:?} of {})", folder, present, expected);
                delta.media.upload_folders.push(folder.clone());
            }
        }

        info!(
            "Push delta: {} to upsert, {} to delete, {} media folders",
            delta.upsert_count(),
            delta.delete_count(),
            delta.media.upload_folders.len()
        );

        Ok(delta)
    }

    async fn group_delta(
        &self,
        manifest: &ClientManifest,
        group: &str,
        client_ids: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut valid: BTreeSet<&str> = BTreeSet::new();
        for id in client_ids {
            match validate_id(id) {
                Ok(()) => {
                    valid.insert(id.as_str());
                }
                Err(e) => warn!("Skipping id in {}: {}", group, e),
            }
        }

        let server_ids = self.documents.list_ids(group).await?;

        let checks = valid.iter().map(|&id| {
            let claimed = manifest.version_of(group, id);
            let server_ids = &server_ids;
            async move { (id, self.needs_upsert(group, id, claimed, server_ids).await) }
        });
        let to_upsert: Vec<String> = join_all(checks)
            .await
            .into_iter()
            .filter(|(_, needed)| *needed)
            .map(|(id, _)| id.to_string())
            .collect();

        let claimed: HashSet<&str> = client_ids.iter().map(String::as_str).collect();
        let to_delete: Vec<String> = server_ids
            .iter()
            .filter(|id| !claimed.contains(id.as_str()))
            .cloned()
            .collect();

        debug!(
            "Group {}: {} client ids, {} server ids, {} to upsert, {} to delete",
            group,
            client_ids.len(),
            server_ids.len(),
            to_upsert.len(),
            to_delete.len()
        );

        Ok((to_upsert, to_delete))
    }

    /// Missing on the server, or the client claims a version the stored document
    /// does not carry. Without a claim an existing document is assumed current.
    async fn needs_upsert(
        &self,
        group: &str,
        id: &str,
        claimed: Option<&str>,
        server_ids: &BTreeSet<String>,
    ) -> bool {
        if !server_ids.contains(id) {
            return true;
        }
        let Some(claimed) = claimed else {
            return false;
        };

        match self.documents.read(group, id).await {
            Ok(Some(document)) => metadata_version(&document) != Some(claimed),
            Ok(None) => true,
            Err(e) => {
                debug!("Unreadable document {}/{}: {}", group, id, e);
                true
            }
        }
    }

    /// Store one entity uploaded by the client. Identical payloads are a no-op.
    pub async fn upsert_entity(
        &self,
        group: &str,
        id: &str,
        document: &Value,
    ) -> Result<UpsertStatus> {
        self.allow_list.validate(group)?;
        validate_id(id)?;
        self.documents.ensure_group(group).await?;
        Ok(self.documents.upsert(group, id, document).await?)
    }

    /// Remove one entity. Removing a missing entity succeeds.
    pub async fn delete_entity(&self, group: &str, id: &str) -> Result<bool> {
        self.allow_list.validate(group)?;
        validate_id(id)?;
        Ok(self.documents.delete(group, id).await?)
    }

    pub async fn read_entity(&self, group: &str, id: &str) -> Result<Option<Value>> {
        self.allow_list.validate(group)?;
        Ok(self.documents.read(group, id).await?)
    }

    pub async fn put_media(
        &self,
        relative: &str,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<PutOutcome> {
        Ok(self.media.put(relative, data, expected_hash).await?)
    }

    /// Absolute path of an uploaded asset
    pub async fn get_media(&self, relative: &str) -> Result<PathBuf> {
        Ok(self.media.get(relative).await?)
    }

    pub async fn read_media(&self, relative: &str) -> Result<Bytes> {
        Ok(self.media.read(relative).await?)
    }

    pub async fn delete_media(&self, relative: &str) -> Result<bool> {
        Ok(self.media.delete(relative).await?)
    }
}
