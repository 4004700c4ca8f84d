//! Atomic file operations for crash safety

use blake3::Hasher;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::{MediaError, Result};

/// Prefix shared by every in-flight temp file; directory scans skip it
pub const TEMP_PREFIX: &str = ".";

/// Hex blake3 digest of a buffer
pub fn hash_bytes(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}

/// Atomic file writer with crash safety guarantees.
///
/// Data goes to a hidden temp file next to the target and is renamed over it
/// on commit, so the temp file always shares the target's filesystem.
pub struct AtomicWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<fs::File>,
    hasher: Hasher,
    bytes_written: u64,
    fsync: bool,
}

impl AtomicWriter {
    /// Create a new atomic writer for the given path
    pub async fn new(path: impl AsRef<Path>, fsync: bool) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let parent = final_path
            .parent()
            .ok_or_else(|| {
                MediaError::StoragePath(format!("No parent for {}", final_path.display()))
            })?
            .to_path_buf();
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                MediaError::StoragePath(format!("Invalid file name: {}", final_path.display()))
            })?;

        let temp_path = parent.join(format!(
            "{}{}.tmp.{}",
            TEMP_PREFIX,
            file_name,
            uuid::Uuid::new_v4().simple()
        ));

        fs::create_dir_all(&parent).await?;

        let file = fs::File::create(&temp_path).await.map_err(|e| {
            MediaError::AtomicWriteFailed(format!("Failed to create temp file: {}", e))
        })?;

        Ok(Self {
            final_path,
            temp_path,
            file: Some(file),
            hasher: Hasher::new(),
            bytes_written: 0,
            fsync,
        })
    }

    /// Write data to the atomic writer
    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| MediaError::AtomicWriteFailed("Writer already finalized".to_string()))?;

        file.write_all(data).await?;
        self.hasher.update(data);
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Finalize the write atomically
    pub async fn commit(mut self) -> Result<AtomicWriteResult> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| MediaError::AtomicWriteFailed("Writer already finalized".to_string()))?;

        file.flush().await?;
        if self.fsync {
            file.sync_all().await?;
        }
        drop(file);

        if let Err(e) = fs::rename(&self.temp_path, &self.final_path).await {
            let _ = fs::remove_file(&self.temp_path).await;
            return Err(MediaError::AtomicWriteFailed(format!(
                "Failed to rename temp file onto {}: {}",
                self.final_path.display(),
                e
            )));
        }

        if self.fsync {
            if let Some(parent) = self.final_path.parent() {
                // Directory fsync is unsupported on some platforms
                if let Ok(dir) = fs::File::open(parent).await {
                    let _ = dir.sync_all().await;
                }
            }
        }

        let hash = self.hasher.finalize();
        debug!(
            "Committed atomic write: {} ({} bytes)",
            self.final_path.display(),
            self.bytes_written
        );

        Ok(AtomicWriteResult {
            path: self.final_path.clone(),
            bytes_written: self.bytes_written,
            content_hash: hash.to_hex().to_string(),
        })
    }

    /// Abort the write and clean up
    pub async fn abort(mut self) -> Result<()> {
        if self.file.take().is_some() {
            if let Err(e) = fs::remove_file(&self.temp_path).await {
                warn!(
                    "Failed to cleanup temp file {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
        Ok(())
    }

    /// Get current write progress
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        // Writer dropped without commit/abort (error path): leave no temp behind
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.temp_path);
        }
    }
}

/// Result of successful atomic write
#[derive(Debug, Clone)]
pub struct AtomicWriteResult {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub content_hash: String,
}

/// Write a whole buffer atomically
pub async fn write_atomic(
    path: impl AsRef<Path>,
    data: &[u8],
    fsync: bool,
) -> Result<AtomicWriteResult> {
    let mut writer = AtomicWriter::new(path, fsync).await?;
    writer.write(data).await?;
    writer.commit().await
}

/// Whether a directory entry name belongs to an in-flight atomic write
pub fn is_temp_name(name: &str) -> bool {
    name.starts_with(TEMP_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_writer() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        let mut writer = AtomicWriter::new(&test_file, false).await.unwrap();
        writer.write(b"Hello, ").await.unwrap();
        writer.write(b"World!").await.unwrap();

        // File shouldn't exist yet
        assert!(!test_file.exists());

        let result = writer.commit().await.unwrap();

        assert!(test_file.exists());
        assert_eq!(result.bytes_written, 13);
        assert_eq!(result.content_hash, hash_bytes(b"Hello, World!"));

        let content = fs::read_to_string(&test_file).await.unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[tokio::test]
    async fn test_atomic_writer_abort() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        let mut writer = AtomicWriter::new(&test_file, false).await.unwrap();
        writer.write(b"This should be discarded").await.unwrap();
        writer.abort().await.unwrap();

        assert!(!test_file.exists());
        let leftovers = std::fs::read_dir(temp_dir.path()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_write_atomic_replaces_existing() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("nested").join("doc.json");

        write_atomic(&test_file, b"first", true).await.unwrap();
        write_atomic(&test_file, b"second", true).await.unwrap();

        let content = fs::read_to_string(&test_file).await.unwrap();
        assert_eq!(content, "second");

        let names: Vec<_> = std::fs::read_dir(test_file.parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["doc.json".to_string()]);
    }
}
