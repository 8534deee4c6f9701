//! SegStore Core Library
//!
//! Core abstractions shared by the archiving and balancing engines.
//! This crate provides:
//! - Data set records and their organizational hierarchy
//! - Size windows and human-readable size formatting
//! - Shares (storage locations) and their properties
//! - Narrow traits for the catalog, free-space queries, transfers and speed probes
//! - Common error handling

pub mod catalog;
pub mod error;
pub mod record;
pub mod share;
pub mod size;
pub mod window;

pub use catalog::{
    CandidateFilter, CatalogAccess, FreeSpaceProvider, RelocationOrder, TargetSpeedProbe,
    TransferExecutor,
};
pub use error::{Result, SegStoreError};
pub use record::{id_list, DataSetRecord, Hierarchy};
pub use share::{discover_shares, Share, ShareFilter, ShareProps, SHARE_PROPS_FILE};
pub use size::{display_size, total_size, GB, KB, MB, TB};
pub use window::{SizeFit, SizeWindow};

/// Space kept free on an unarchiving scratch share on top of the requested data sets.
pub const MINIMUM_FREE_SCRATCH_SPACE: u64 = GB;

/// Default minimum free space a share should keep (10 GB).
pub const DEFAULT_MIN_FREE_BYTES: u64 = 10 * GB;
