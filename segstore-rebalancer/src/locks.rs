//! Per-data-set locks
//!
//! A relocation holds the lock of its data set from before reading the
//! authoritative home until the new home is recorded. Other actors that
//! mutate data sets (archiving, deletion) take the same lock.

use parking_lot::Mutex;
use segstore_core::{Result, SegStoreError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::trace;

/// Lock manager keyed by data set id
#[derive(Debug, Default)]
pub struct DataSetLocks {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Held lock of one data set, released on drop
#[derive(Debug)]
pub struct DataSetLockGuard {
    data_set_id: String,
    _permit: OwnedSemaphorePermit,
}

impl DataSetLockGuard {
    pub fn data_set_id(&self) -> &str {
        &self.data_set_id
    }
}

impl DataSetLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn semaphore(&self, data_set_id: &str) -> Arc<Semaphore> {
        self.locks
            .lock()
            .entry(data_set_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }

    /// Wait for and take the lock of a data set
    pub async fn lock(&self, data_set_id: &str) -> Result<DataSetLockGuard> {
        let permit = self
            .semaphore(data_set_id)
            .acquire_owned()
            .await
            .map_err(|e| SegStoreError::Internal(format!("lock of '{}': {}", data_set_id, e)))?;
        trace!(data_set = %data_set_id, "Locked");
        Ok(DataSetLockGuard {
            data_set_id: data_set_id.to_string(),
            _permit: permit,
        })
    }

    /// Take the lock only if nobody holds it
    pub fn try_lock(&self, data_set_id: &str) -> Option<DataSetLockGuard> {
        let permit = self.semaphore(data_set_id).try_acquire_owned().ok()?;
        Some(DataSetLockGuard {
            data_set_id: data_set_id.to_string(),
            _permit: permit,
        })
    }

    pub fn is_locked(&self, data_set_id: &str) -> bool {
        self.locks
            .lock()
            .get(data_set_id)
            .map(|s| s.available_permits() == 0)
            .unwrap_or(false)
    }

    /// Wait until no holder has the data set locked
    pub async fn await_unlocked(&self, data_set_id: &str) -> Result<()> {
        drop(self.lock(data_set_id).await?);
        Ok(())
    }

    /// Forget locks nobody holds or waits for
    pub fn prune(&self) {
        self.locks
            .lock()
            .retain(|_, s| Arc::strong_count(s) > 1 || s.available_permits() == 0);
    }

    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}
