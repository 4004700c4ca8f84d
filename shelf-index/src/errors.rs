use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid group: {0}")]
    InvalidGroup(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Media error: {0}")]
    Media(#[from] shelf_media::MediaError),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl IndexError {
    /// Whether this error was caused by caller input rather than the store
    pub fn is_validation(&self) -> bool {
        match self {
            IndexError::InvalidGroup(_) | IndexError::InvalidId(_) => true,
            IndexError::Media(e) => e.is_validation(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, IndexError>;
