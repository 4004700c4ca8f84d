//! Local index for shelfsync
//!
//! Holds the entity documents mirrored from a library, the versioned snapshot
//! a pull sync diffs against, and the manifest types exchanged with push clients.

pub mod documents;
pub mod errors;
pub mod manifest;
pub mod snapshot;
pub mod validation;

pub use documents::{metadata_version, DocumentStore, UpsertStatus, METADATA_VERSION_FIELD};
pub use errors::{IndexError, Result};
pub use manifest::{ClientManifest, DeltaResult, MediaDelta};
pub use snapshot::{
    db_key, media_key, parse_db_key, parse_media_key, SectionMeta, Snapshot, SnapshotStamp,
    VersionedSnapshot,
};
pub use validation::{
    validate_group, validate_group_name, validate_id, GroupAllowList, RESERVED_GROUPS,
};
