//! SegStore Storage Backends
//!
//! Concrete collaborators for the engines:
//! - `MemoryCatalog` in-memory catalog with a capacity-based free-space model, for testing
//! - `JsonCatalog` catalog snapshot persisted as a JSON file
//! - `DiskFreeSpace` free space of the file system holding a share
//! - `LocalCopyTransfer` copies data sets between shares on mounted file systems

pub mod disk;
pub mod json;
pub mod memory;

pub use disk::{DiskFreeSpace, LocalCopyTransfer};
pub use json::JsonCatalog;
pub use memory::{MemoryCatalog, MemoryTransfer, TransferEvent};

/// Default timeout for a single data set copy (6 hours)
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 6 * 60 * 60;
