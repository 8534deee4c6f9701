//! Collaborator traits
//!
//! The engines never talk to a metadata service, a file system or a copy
//! tool directly. Everything outside the engines is reached through the
//! narrow traits defined here.

use crate::error::Result;
use crate::record::DataSetRecord;
use crate::share::Share;
use std::fmt;

// =============================================================================
// CATALOG
// =============================================================================

/// Which data sets a catalog listing should return
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CandidateFilter {
    /// Data sets without a copy in the archive
    ArchivalCandidates,
    /// Live inventory of one share
    OnShare(String),
}

/// Read access to data set records plus the few writes the engines need
#[async_trait::async_trait]
pub trait CatalogAccess: Send + Sync {
    /// List data sets. One call is one consistent snapshot.
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<DataSetRecord>>;

    /// Size of a data set, `None` if the catalog does not know it either
    async fn resolve_size(&self, data_set_id: &str) -> Result<Option<u64>>;

    /// Authoritative share currently holding a data set, `None` if unknown or deleted
    async fn current_share(&self, data_set_id: &str) -> Result<Option<String>>;

    /// Record that a data set now lives on `share_id` with the verified size
    async fn record_relocation(&self, data_set_id: &str, share_id: &str, size: u64)
        -> Result<()>;

    /// Drop data sets from a scratch share; they stay available from the archive
    async fn release_from_share(&self, data_set_ids: &[String]) -> Result<()>;
}

// =============================================================================
// FREE SPACE
// =============================================================================

/// Live free-space figure of a share.
///
/// Implementations must not cache: every call reflects the medium as it is now.
pub trait FreeSpaceProvider: Send + Sync {
    fn free_space(&self, share: &Share) -> Result<u64>;
}

// =============================================================================
// TRANSFER
// =============================================================================

/// One relocation of a data set between two shares
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationOrder {
    pub data_set_id: String,
    pub source: String,
    pub destination: String,
    /// Size at planning time
    pub size: u64,
}

impl fmt::Display for RelocationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: share {} -> share {}",
            self.data_set_id, self.source, self.destination
        )
    }
}

/// Physically moves data set content between shares
#[async_trait::async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Copy a data set from `source` to `destination` and verify the copy.
    ///
    /// Returns the verified size in bytes. The source copy is left in place.
    async fn transfer(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        destination: &Share,
    ) -> Result<u64>;

    /// Delete the copy of a data set held by `share`
    async fn remove(&self, data_set: &DataSetRecord, share: &Share) -> Result<()>;
}

// =============================================================================
// SPEED PROBE
// =============================================================================

/// Transfer-speed acceptability check for a candidate target share
#[async_trait::async_trait]
pub trait TargetSpeedProbe: Send + Sync {
    /// Name used in configuration and logs
    fn name(&self) -> &str;

    async fn accepts(&self, data_set: &DataSetRecord, candidate: &Share) -> bool;
}
