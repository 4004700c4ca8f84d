//! Error types for sync operations

use shelf_index::IndexError;
use shelf_media::MediaError;
use thiserror::Error;

use crate::source::SourceError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Sync already in progress: {0}")]
    Locked(String),

    #[error("Scan of {section} incomplete: {reason}")]
    ScanIncomplete { section: String, reason: String },

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Fatal storage error: {0}")]
    Fatal(String),

    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Media error: {0}")]
    Media(MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<IndexError> for SyncError {
    fn from(e: IndexError) -> Self {
        match e {
            e if e.is_validation() => SyncError::Validation(e.to_string()),
            IndexError::Media(e) => e.into(),
            e => SyncError::Index(e),
        }
    }
}

impl From<MediaError> for SyncError {
    fn from(e: MediaError) -> Self {
        match e {
            MediaError::NotFound(path) => SyncError::NotFound(path),
            e if e.is_validation() => SyncError::Validation(e.to_string()),
            e => SyncError::Media(e),
        }
    }
}

/// What a caller should tell its user about a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request itself was malformed; nothing was applied
    InvalidInput,
    /// Nothing here
    NotFound,
    /// Another sync for the same target is running; retry later
    Locked,
    /// We tried and failed
    Failed,
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Validation(_) => ErrorClass::InvalidInput,
            SyncError::NotFound(_) => ErrorClass::NotFound,
            SyncError::Locked(_) => ErrorClass::Locked,
            _ => ErrorClass::Failed,
        }
    }

    /// HTTP status an API layer would answer with
    pub fn status_code(&self) -> u16 {
        match self.class() {
            ErrorClass::InvalidInput => 400,
            ErrorClass::NotFound => 404,
            ErrorClass::Locked => 409,
            ErrorClass::Failed => match self {
                SyncError::Source(_) | SyncError::ScanIncomplete { .. } => 502,
                _ => 500,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
