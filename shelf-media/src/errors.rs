use thiserror::Error;

use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Media not found: {0}")]
    NotFound(String),

    #[error("Invalid media path: {0}")]
    Validation(#[from] ValidationError),

    #[error("Atomic write failed: {0}")]
    AtomicWriteFailed(String),

    #[error("Storage path error: {0}")]
    StoragePath(String),
}

impl MediaError {
    /// Whether this error was caused by caller input rather than the store
    pub fn is_validation(&self) -> bool {
        matches!(self, MediaError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, MediaError>;
