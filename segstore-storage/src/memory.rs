//! In-memory catalog and transfer backends
//!
//! Used for testing and development. Not persistent.
//!
//! Free space follows a simple capacity model: a share's free space is its
//! configured capacity minus the sizes of the data sets currently homed on it.

use async_trait::async_trait;
use parking_lot::RwLock;
use segstore_core::{
    CandidateFilter, CatalogAccess, DataSetRecord, FreeSpaceProvider, Result, SegStoreError,
    Share, TransferExecutor,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

/// In-memory catalog
pub struct MemoryCatalog {
    /// Records by data set id
    records: RwLock<BTreeMap<String, DataSetRecord>>,

    /// Sizes known to the catalog but missing from the records
    known_sizes: RwLock<HashMap<String, u64>>,

    /// Share capacities in bytes
    capacities: RwLock<HashMap<String, u64>>,

    /// Operation counters
    listings: AtomicU64,
    relocations: AtomicU64,
    releases: AtomicU64,
}

impl MemoryCatalog {
    /// Create an empty catalog
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            known_sizes: RwLock::new(HashMap::new()),
            capacities: RwLock::new(HashMap::new()),
            listings: AtomicU64::new(0),
            relocations: AtomicU64::new(0),
            releases: AtomicU64::new(0),
        }
    }

    /// Create a catalog holding the given records
    pub fn with_records(records: impl IntoIterator<Item = DataSetRecord>) -> Self {
        let catalog = Self::new();
        for record in records {
            catalog.insert(record);
        }
        catalog
    }

    /// Add or replace a record
    pub fn insert(&self, record: DataSetRecord) {
        self.records.write().insert(record.id.clone(), record);
    }

    /// Forget a data set, as if it had been deleted concurrently
    pub fn remove(&self, data_set_id: &str) -> Option<DataSetRecord> {
        self.records.write().remove(data_set_id)
    }

    pub fn get(&self, data_set_id: &str) -> Option<DataSetRecord> {
        self.records.read().get(data_set_id).cloned()
    }

    /// Move a data set to another share without a transfer, as a concurrent actor would
    pub fn rehome(&self, data_set_id: &str, share_id: &str) {
        if let Some(record) = self.records.write().get_mut(data_set_id) {
            record.share_id = Some(share_id.to_string());
        }
    }

    /// Size the catalog can resolve for records that lack one
    pub fn set_known_size(&self, data_set_id: &str, size: u64) {
        self.known_sizes.write().insert(data_set_id.to_string(), size);
    }

    /// Set the capacity of a share
    pub fn set_capacity(&self, share_id: &str, bytes: u64) {
        self.capacities.write().insert(share_id.to_string(), bytes);
    }

    /// Bytes of the data sets currently homed on a share
    pub fn used_space(&self, share_id: &str) -> u64 {
        self.records
            .read()
            .values()
            .filter(|r| r.is_homed_on(share_id))
            .filter_map(|r| r.size)
            .sum()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    pub fn listing_count(&self) -> u64 {
        self.listings.load(Ordering::Relaxed)
    }

    pub fn relocation_count(&self) -> u64 {
        self.relocations.load(Ordering::Relaxed)
    }

    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// All records, ordered by id
    pub fn snapshot(&self) -> Vec<DataSetRecord> {
        self.records.read().values().cloned().collect()
    }

    fn select(&self, filter: &CandidateFilter) -> Vec<DataSetRecord> {
        self.records
            .read()
            .values()
            .filter(|r| match filter {
                CandidateFilter::ArchivalCandidates => !r.present_in_archive,
                CandidateFilter::OnShare(share_id) => r.is_homed_on(share_id),
            })
            .cloned()
            .collect()
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogAccess for MemoryCatalog {
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<DataSetRecord>> {
        self.listings.fetch_add(1, Ordering::Relaxed);
        Ok(self.select(filter))
    }

    async fn resolve_size(&self, data_set_id: &str) -> Result<Option<u64>> {
        let from_record = self.records.read().get(data_set_id).and_then(|r| r.size);
        Ok(from_record.or_else(|| self.known_sizes.read().get(data_set_id).copied()))
    }

    async fn current_share(&self, data_set_id: &str) -> Result<Option<String>> {
        Ok(self
            .records
            .read()
            .get(data_set_id)
            .and_then(|r| r.share_id.clone()))
    }

    async fn record_relocation(&self, data_set_id: &str, share_id: &str, size: u64) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(data_set_id)
            .ok_or_else(|| SegStoreError::DataSetNotFound(data_set_id.to_string()))?;
        record.share_id = Some(share_id.to_string());
        record.size = Some(size);
        self.relocations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn release_from_share(&self, data_set_ids: &[String]) -> Result<()> {
        let mut records = self.records.write();
        for id in data_set_ids {
            if let Some(record) = records.get_mut(id) {
                record.share_id = None;
            }
        }
        self.releases.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

impl FreeSpaceProvider for MemoryCatalog {
    fn free_space(&self, share: &Share) -> Result<u64> {
        let capacity = self
            .capacities
            .read()
            .get(&share.id)
            .copied()
            .ok_or_else(|| SegStoreError::ShareNotFound(share.id.clone()))?;
        Ok(capacity.saturating_sub(self.used_space(&share.id)))
    }
}

/// One transfer or removal performed by `MemoryTransfer`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    Copied {
        data_set_id: String,
        source: String,
        destination: String,
    },
    Removed {
        data_set_id: String,
        share: String,
    },
}

/// Transfer backend that only records what it was asked to do
pub struct MemoryTransfer {
    /// Data sets whose copy fails verification
    failing: RwLock<HashSet<String>>,

    /// Performed operations in order
    events: RwLock<Vec<TransferEvent>>,

    bytes_copied: AtomicU64,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        Self {
            failing: RwLock::new(HashSet::new()),
            events: RwLock::new(Vec::new()),
            bytes_copied: AtomicU64::new(0),
        }
    }

    /// Make every transfer of the given data set fail
    pub fn fail_for(&self, data_set_id: &str) {
        self.failing.write().insert(data_set_id.to_string());
    }

    pub fn events(&self) -> Vec<TransferEvent> {
        self.events.read().clone()
    }

    /// Ids of the data sets copied so far, in order
    pub fn copied_ids(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Copied { data_set_id, .. } => Some(data_set_id.clone()),
                TransferEvent::Removed { .. } => None,
            })
            .collect()
    }

    /// Ids of the data sets removed so far, in order
    pub fn removed_ids(&self) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Removed { data_set_id, .. } => Some(data_set_id.clone()),
                TransferEvent::Copied { .. } => None,
            })
            .collect()
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied.load(Ordering::Relaxed)
    }
}

impl Default for MemoryTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransferExecutor for MemoryTransfer {
    async fn transfer(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        destination: &Share,
    ) -> Result<u64> {
        if self.failing.read().contains(&data_set.id) {
            return Err(SegStoreError::Verification(format!(
                "checksum mismatch for '{}' on share {}",
                data_set.id, destination.id
            )));
        }
        let size = data_set
            .size
            .ok_or_else(|| SegStoreError::UnknownSize(data_set.id.clone()))?;
        self.events.write().push(TransferEvent::Copied {
            data_set_id: data_set.id.clone(),
            source: source.id.clone(),
            destination: destination.id.clone(),
        });
        self.bytes_copied.fetch_add(size, Ordering::Relaxed);
        Ok(size)
    }

    async fn remove(&self, data_set: &DataSetRecord, share: &Share) -> Result<()> {
        self.events.write().push(TransferEvent::Removed {
            data_set_id: data_set.id.clone(),
            share: share.id.clone(),
        });
        Ok(())
    }
}
