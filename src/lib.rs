//! shelfsync workspace root
//!
//! Re-exports the workspace crates so integration tests can exercise them
//! together.

pub use shelf_index as index;
pub use shelf_media as media;
pub use shelf_sync as sync;
