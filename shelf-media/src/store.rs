use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, trace, warn};

use crate::atomic::{self, hash_bytes};
use crate::errors::{MediaError, Result};
use crate::validation::{self, MAX_OBJECT_SIZE};

/// Fsync policy for controlling write durability vs performance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync the file and its directory after every write
    Always,
    /// Skip fsync entirely (tests, throwaway mirrors)
    Never,
}

/// Configuration options for the media store.
#[derive(Debug, Clone)]
pub struct MediaStoreConfig {
    pub fsync_policy: FsyncPolicy,
    /// Largest asset accepted by `put`
    pub max_object_size: usize,
}

impl Default for MediaStoreConfig {
    fn default() -> Self {
        Self {
            fsync_policy: FsyncPolicy::Always,
            max_object_size: MAX_OBJECT_SIZE,
        }
    }
}

/// What a `put` did to the file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PutStatus {
    Created,
    Updated,
    Unchanged,
}

impl PutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PutStatus::Created => "created",
            PutStatus::Updated => "updated",
            PutStatus::Unchanged => "unchanged",
        }
    }

    /// Whether any bytes hit the disk
    pub fn wrote(&self) -> bool {
        !matches!(self, PutStatus::Unchanged)
    }
}

/// Result of a `put`
#[derive(Debug, Clone, PartialEq)]
pub struct PutOutcome {
    pub status: PutStatus,
    pub bytes: u64,
    pub path: PathBuf,
}

/// Map a content type to the file extension used for stored assets.
pub fn extension_for_content_type(content_type: &str) -> &'static str {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match mime.as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        _ => "bin",
    }
}

/// Sandboxed store for binary media assets.
///
/// # Storage Layout
///
/// Pulled assets live at `{root}/{group}/{id}/{kind}.{ext}` with exactly one
/// file per kind. Pushed assets use any validated relative path under `{root}`.
/// Every caller-supplied path is normalized and must stay inside the root;
/// traversal attempts fail with a validation error.
#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
    config: MediaStoreConfig,
}

impl MediaStore {
    /// Create a media store at the given root, creating the directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        Self::new_with_config(root, MediaStoreConfig::default()).await
    }

    pub async fn new_with_config(root: impl AsRef<Path>, config: MediaStoreConfig) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        debug!("Media store initialized at {:?} with config {:?}", root, config);

        Ok(Self { root, config })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fsync(&self) -> bool {
        self.config.fsync_policy == FsyncPolicy::Always
    }

    /// Resolve a caller-supplied relative path under the root
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        Ok(validation::resolve_within_root(&self.root, relative)?)
    }

    /// Store `data` at `relative`, skipping the write when the file already matches.
    ///
    /// A file of identical length counts as unchanged when no hash is given.
    /// With `expected_hash` (hex blake3) the existing file is hashed and only
    /// skipped on a match.
    pub async fn put(
        &self,
        relative: &str,
        data: &[u8],
        expected_hash: Option<&str>,
    ) -> Result<PutOutcome> {
        validation::validate_object_size(data.len(), self.config.max_object_size)?;
        let path = self.resolve(relative)?;
        let size = data.len() as u64;

        let existed = match fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                return Err(MediaError::StoragePath(format!(
                    "{} is a directory",
                    path.display()
                )));
            }
            Ok(meta) => {
                if meta.len() == size && self.matches_existing(&path, expected_hash).await? {
                    trace!("Media {} unchanged ({} bytes)", relative, size);
                    return Ok(PutOutcome {
                        status: PutStatus::Unchanged,
                        bytes: size,
                        path,
                    });
                }
                true
            }
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };

        let result = atomic::write_atomic(&path, data, self.fsync()).await?;
        let status = if existed {
            PutStatus::Updated
        } else {
            PutStatus::Created
        };

        debug!("Media {} {} ({} bytes)", relative, status.as_str(), result.bytes_written);

        Ok(PutOutcome {
            status,
            bytes: result.bytes_written,
            path,
        })
    }

    async fn matches_existing(&self, path: &Path, expected_hash: Option<&str>) -> Result<bool> {
        let Some(expected) = expected_hash else {
            return Ok(true);
        };

        match fs::read(path).await {
            Ok(existing) => Ok(hash_bytes(&existing).eq_ignore_ascii_case(expected.trim())),
            // Vanished between stat and read
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Absolute path of a stored asset, or `NotFound`
    pub async fn get(&self, relative: &str) -> Result<PathBuf> {
        let path = self.resolve(relative)?;
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(MediaError::NotFound(relative.to_string())),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MediaError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read a stored asset
    pub async fn read(&self, relative: &str) -> Result<Bytes> {
        let path = self.resolve(relative)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(MediaError::NotFound(relative.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a stored asset. Returns whether anything was removed.
    pub async fn delete(&self, relative: &str) -> Result<bool> {
        let path = self.resolve(relative)?;
        remove_file_if_exists(&path).await
    }

    /// Number of files stored below a folder, `None` when the folder is missing
    pub async fn folder_file_count(&self, relative: &str) -> Result<Option<usize>> {
        let dir = self.resolve(relative)?;
        match fs::metadata(&dir).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut count = 0;
        let mut stack = vec![dir];
        while let Some(current) = stack.pop() {
            let mut entries = match fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if atomic::is_temp_name(&name.to_string_lossy()) {
                    continue;
                }
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(entry.path());
                } else {
                    count += 1;
                }
            }
        }

        Ok(Some(count))
    }

    /// Directory holding every asset of one entity
    pub fn entity_dir(&self, group: &str, id: &str) -> Result<PathBuf> {
        validation::validate_segment(group)?;
        validation::validate_segment(id)?;
        Ok(self.root.join(group).join(id))
    }

    /// Store the asset of one kind for an entity as `{kind}.{ext}`.
    ///
    /// Any other `{kind}.*` file is removed first so a kind never has two
    /// extensions on disk. The same-extension file is replaced by rename.
    pub async fn put_kind(
        &self,
        group: &str,
        id: &str,
        kind: &str,
        content_type: &str,
        data: &[u8],
    ) -> Result<PutOutcome> {
        validation::validate_segment(kind)?;
        let dir = self.entity_dir(group, id)?;
        let file_name = format!("{}.{}", kind, extension_for_content_type(content_type));

        for stale in kind_files(&dir, kind).await? {
            if stale.file_name().and_then(|n| n.to_str()) != Some(file_name.as_str()) {
                remove_file_if_exists(&stale).await?;
                debug!("Removed stale media {}", stale.display());
            }
        }

        let relative = format!("{}/{}/{}", group, id, file_name);
        let hash = hash_bytes(data);
        self.put(&relative, data, Some(&hash)).await
    }

    /// Path of the stored asset for a kind, if any
    pub async fn find_kind(&self, group: &str, id: &str, kind: &str) -> Result<Option<PathBuf>> {
        validation::validate_segment(kind)?;
        let dir = self.entity_dir(group, id)?;
        Ok(kind_files(&dir, kind).await?.into_iter().next())
    }

    /// Remove every `{kind}.*` file of an entity, leaving sibling kinds alone
    pub async fn remove_kind(&self, group: &str, id: &str, kind: &str) -> Result<usize> {
        validation::validate_segment(kind)?;
        let dir = self.entity_dir(group, id)?;

        let mut removed = 0;
        for path in kind_files(&dir, kind).await? {
            if remove_file_if_exists(&path).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove an entity's whole media folder regardless of how many kinds it holds
    pub async fn remove_entity(&self, group: &str, id: &str) -> Result<bool> {
        let dir = self.entity_dir(group, id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {
                debug!("Removed media folder {}", dir.display());
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Files in `dir` named `{kind}.{ext}`
async fn kind_files(dir: &Path, kind: &str) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut matches = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if atomic::is_temp_name(&name) {
            continue;
        }
        if let Some((stem, _ext)) = name.rsplit_once('.') {
            if stem == kind {
                matches.push(entry.path());
            }
        }
    }
    Ok(matches)
}

async fn remove_file_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => {
            warn!("Failed to remove {}: {}", path.display(), e);
            Err(e.into())
        }
    }
}
