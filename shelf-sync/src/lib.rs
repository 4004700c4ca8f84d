//! Delta synchronization engine for shelfsync
//!
//! This crate reconciles an authoritative library against the local store:
//! - Pull reconciliation: scan a remote source, diff against the last snapshot,
//!   apply entity and media deltas, commit the new snapshot
//! - Push delta computation against client-reported inventories
//! - Snapshot-coherent collection caching
//! - Per-target single-flight locking

pub mod cache;
pub mod config;
pub mod diff;
pub mod errors;
pub mod guard;
pub mod manager;
pub mod outcome;
pub mod pull;
pub mod push;
pub mod source;

pub use cache::CollectionCache;
pub use config::SyncConfig;
pub use diff::{ChangeType, DiffStats, EntityChange, MediaChange, SnapshotDiff};
pub use errors::{ErrorClass, Result, SyncError};
pub use guard::{FlightPermit, SingleFlightGuard};
pub use manager::SyncManager;
pub use outcome::{ApplyFailure, ApplyOutcome};
pub use pull::{PullConfig, PullReconciler, PullReport};
pub use push::PushReconciler;
pub use source::{
    media_version, ItemPage, LibrarySource, MediaPayload, SectionInfo, SourceError, SourceItem,
};
