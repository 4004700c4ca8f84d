//! Media asset storage for shelfsync
//!
//! Binary assets (cover art, thumbnails, logos, arbitrary uploaded files) live
//! under a single sandboxed root. Writes go through a temp file plus rename and
//! are skipped entirely when the bytes on disk already match.

pub mod atomic;
pub mod errors;
pub mod store;
pub mod validation;

pub use atomic::{hash_bytes, write_atomic, AtomicWriteResult, AtomicWriter};
pub use errors::{MediaError, Result};
pub use store::{
    extension_for_content_type, FsyncPolicy, MediaStore, MediaStoreConfig, PutOutcome, PutStatus,
};
pub use validation::ValidationError;
