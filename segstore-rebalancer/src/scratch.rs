//! Unarchiving scratch share clean-up
//!
//! Data sets restored from the archive for temporary access land on a
//! scratch share. Before new ones are restored, archived data sets that are
//! already on the share are evicted, least recently accessed first.

use crate::locks::DataSetLocks;
use crate::metrics;
use segstore_core::{
    display_size, id_list, CandidateFilter, CatalogAccess, DataSetRecord, FreeSpaceProvider,
    Result, SegStoreError, Share, TransferExecutor, MINIMUM_FREE_SCRATCH_SPACE,
};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

pub struct ScratchCleaner {
    catalog: Arc<dyn CatalogAccess>,
    free_space: Arc<dyn FreeSpaceProvider>,
    transfer: Arc<dyn TransferExecutor>,
    locks: Arc<DataSetLocks>,
    /// Bytes kept free on top of the requested data sets
    reserve: u64,
}

impl ScratchCleaner {
    pub fn new(
        catalog: Arc<dyn CatalogAccess>,
        free_space: Arc<dyn FreeSpaceProvider>,
        transfer: Arc<dyn TransferExecutor>,
        locks: Arc<DataSetLocks>,
    ) -> Self {
        Self {
            catalog,
            free_space,
            transfer,
            locks,
            reserve: MINIMUM_FREE_SCRATCH_SPACE,
        }
    }

    pub fn with_reserve(mut self, reserve: u64) -> Self {
        self.reserve = reserve;
        self
    }

    /// Make room for `requested` on a scratch share.
    ///
    /// Returns the evicted data sets. Nothing is evicted when even evicting
    /// every archived data set would not make room.
    #[instrument(skip_all, fields(share = %share.id, requested = requested.len()))]
    pub async fn free_scratch_space(
        &self,
        share: &Share,
        requested: &[DataSetRecord],
    ) -> Result<Vec<DataSetRecord>> {
        if !share.is_unarchiving_scratch() {
            return Err(SegStoreError::NotAScratchShare {
                share_id: share.id.clone(),
            });
        }

        let mut present = self
            .catalog
            .list_candidates(&CandidateFilter::OnShare(share.id.clone()))
            .await?;
        for data_set in present.iter_mut().filter(|d| d.size.is_none()) {
            data_set.size = self.catalog.resolve_size(&data_set.id).await?;
        }

        let present_ids: HashSet<&str> = present.iter().map(|d| d.id.as_str()).collect();
        let mut needed = 0u64;
        for data_set in requested.iter().filter(|d| !present_ids.contains(d.id.as_str())) {
            needed += match data_set.size {
                Some(size) => size,
                None => self
                    .catalog
                    .resolve_size(&data_set.id)
                    .await?
                    .ok_or_else(|| SegStoreError::UnknownSize(data_set.id.clone()))?,
            };
        }

        let used: u64 = present.iter().filter_map(|d| d.size).sum();
        let live_free = self.free_space.free_space(share)?;
        let free = match share.props.scratch_max_size {
            Some(max) => max.saturating_sub(used).min(live_free),
            None => live_free,
        };
        let mut available = free.saturating_sub(self.reserve);
        debug!(
            needed = %display_size(needed),
            available = %display_size(available),
            "Scratch space"
        );
        if needed <= available {
            return Ok(Vec::new());
        }

        let requested_ids: HashSet<&str> = requested.iter().map(|d| d.id.as_str()).collect();
        let mut evictable: Vec<DataSetRecord> = present
            .iter()
            .filter(|d| d.present_in_archive && !requested_ids.contains(d.id.as_str()))
            .cloned()
            .collect();
        evictable.sort_by(|a, b| {
            a.access_timestamp
                .cmp(&b.access_timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut evicted = Vec::new();
        for data_set in evictable {
            if needed <= available {
                break;
            }
            available += data_set.size.unwrap_or(0);
            evicted.push(data_set);
        }
        if needed > available {
            return Err(SegStoreError::ScratchExhausted {
                share_id: share.id.clone(),
                free: available,
                requested: needed,
            });
        }

        let ids: Vec<String> = evicted.iter().map(|d| d.id.clone()).collect();
        self.catalog.release_from_share(&ids).await?;
        for data_set in &evicted {
            self.locks.await_unlocked(&data_set.id).await?;
            if let Err(e) = self.transfer.remove(data_set, share).await {
                warn!(data_set = %data_set.id, error = %e, "Evicted copy not removed");
            }
        }

        metrics::record_evictions(&share.id, evicted.len());
        info!(evicted = %id_list(&evicted), "Scratch share cleaned up");
        Ok(evicted)
    }
}
