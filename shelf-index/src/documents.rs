//! One JSON document per entity under `{root}/{group}/{id}.json`

use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::errors::{IndexError, Result};
use crate::validation::{validate_group, validate_id};

/// Field a client embeds in a document to version it
pub const METADATA_VERSION_FIELD: &str = "MetadataVersion";

const DOCUMENT_EXTENSION: &str = "json";

/// The client-assigned version of a stored document, if it carries one
pub fn metadata_version(document: &Value) -> Option<&str> {
    document.get(METADATA_VERSION_FIELD)?.as_str()
}

/// What an upsert did to the document on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertStatus {
    Created,
    Updated,
    Unchanged,
}

/// Flat-file document store.
///
/// Documents are opaque `serde_json::Value`s. Writes are atomic per file;
/// reads tolerate a document disappearing between listing and reading.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    root: PathBuf,
    fsync: bool,
}

impl DocumentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            fsync: true,
        }
    }

    pub fn with_fsync(mut self, fsync: bool) -> Self {
        self.fsync = fsync;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, group: &str) -> Result<PathBuf> {
        validate_group(group)?;
        Ok(self.root.join(group))
    }

    pub fn path_for(&self, group: &str, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self
            .group_dir(group)?
            .join(format!("{}.{}", id, DOCUMENT_EXTENSION)))
    }

    /// Create the group directory
    pub async fn ensure_group(&self, group: &str) -> Result<PathBuf> {
        let dir = self.group_dir(group)?;
        fs::create_dir_all(&dir).await.map_err(|e| {
            IndexError::Storage(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        Ok(dir)
    }

    /// Ids with a document on disk. A missing group directory is empty.
    pub async fn list_ids(&self, group: &str) -> Result<BTreeSet<String>> {
        let dir = self.group_dir(group)?;
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = BTreeSet::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if shelf_media::atomic::is_temp_name(&name) {
                continue;
            }
            let Some(id) = name.strip_suffix(".json") else {
                continue;
            };
            if validate_id(id).is_ok() {
                ids.insert(id.to_string());
            } else {
                trace!("Skipping unexpected file {} in {}", name, dir.display());
            }
        }

        Ok(ids)
    }

    /// Read a document, `None` when absent
    pub async fn read(&self, group: &str, id: &str) -> Result<Option<Value>> {
        let path = self.path_for(group, id)?;
        read_document(&path).await
    }

    /// Write a document atomically
    pub async fn write(&self, group: &str, id: &str, document: &Value) -> Result<()> {
        let path = self.path_for(group, id)?;
        let data = serde_json::to_vec_pretty(document)?;
        shelf_media::write_atomic(&path, &data, self.fsync).await?;
        debug!("Wrote document {}/{}", group, id);
        Ok(())
    }

    /// Write a document unless an identical one is already stored.
    ///
    /// Equality is structural, so key order and formatting do not matter. An
    /// existing document that fails to parse is overwritten.
    pub async fn upsert(&self, group: &str, id: &str, document: &Value) -> Result<UpsertStatus> {
        let existing = match self.read(group, id).await {
            Ok(existing) => existing,
            Err(IndexError::Serialization(e)) => {
                warn!("Replacing unparsable document {}/{}: {}", group, id, e);
                Some(Value::Null)
            }
            Err(e) => return Err(e),
        };

        let status = match existing {
            Some(current) if current == *document => return Ok(UpsertStatus::Unchanged),
            Some(_) => UpsertStatus::Updated,
            None => UpsertStatus::Created,
        };

        self.write(group, id, document).await?;
        Ok(status)
    }

    /// Delete a document. Deleting a missing document succeeds.
    pub async fn delete(&self, group: &str, id: &str) -> Result<bool> {
        let path = self.path_for(group, id)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Deleted document {}/{}", group, id);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Read every document of a group concurrently.
    ///
    /// Documents that vanish or fail to parse mid-read are skipped.
    pub async fn load_group(&self, group: &str) -> Result<Vec<Value>> {
        let dir = self.group_dir(group)?;
        let ids = self.list_ids(group).await?;

        let reads = ids.iter().map(|id| {
            let path = dir.join(format!("{}.{}", id, DOCUMENT_EXTENSION));
            async move { (id, read_document(&path).await) }
        });

        let mut documents = Vec::with_capacity(ids.len());
        for (id, result) in join_all(reads).await {
            match result {
                Ok(Some(document)) => documents.push(document),
                Ok(None) => trace!("Document {}/{} vanished during load", group, id),
                Err(e) => warn!("Skipping document {}/{}: {}", group, id, e),
            }
        }

        Ok(documents)
    }
}

async fn read_document(path: &Path) -> Result<Option<Value>> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&data)?))
}
