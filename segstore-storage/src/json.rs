//! JSON file catalog
//!
//! Catalog snapshot kept in a single JSON file holding an array of data set
//! records. Writes go to a temporary sibling file first and are renamed over
//! the snapshot, so readers never observe a half-written file.

use crate::memory::MemoryCatalog;
use async_trait::async_trait;
use segstore_core::{CandidateFilter, CatalogAccess, DataSetRecord, Result, SegStoreError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Catalog persisted as a JSON file
pub struct JsonCatalog {
    path: PathBuf,
    inner: MemoryCatalog,
    /// Serializes write-backs
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonCatalog {
    /// Load a catalog snapshot. A missing file is an empty catalog.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let records: Vec<DataSetRecord> = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_json::from_str(&content)?
        } else {
            Vec::new()
        };
        info!(path = ?path, records = records.len(), "Opened catalog");

        Ok(Self {
            path,
            inner: MemoryCatalog::with_records(records),
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Write `records` as the new snapshot
    async fn write_snapshot(&self, records: &[DataSetRecord]) -> Result<()> {
        let json = serde_json::to_vec_pretty(records)?;
        let tmp = self.path.with_extension("json.tmp");
        let written = match tokio::fs::write(&tmp, json).await {
            Ok(()) => tokio::fs::rename(&tmp, &self.path).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!(path = ?self.path, "Catalog written");
        Ok(())
    }
}

#[async_trait]
impl CatalogAccess for JsonCatalog {
    async fn list_candidates(&self, filter: &CandidateFilter) -> Result<Vec<DataSetRecord>> {
        self.inner.list_candidates(filter).await
    }

    async fn resolve_size(&self, data_set_id: &str) -> Result<Option<u64>> {
        self.inner.resolve_size(data_set_id).await
    }

    async fn current_share(&self, data_set_id: &str) -> Result<Option<String>> {
        self.inner.current_share(data_set_id).await
    }

    // Changes reach memory only once the snapshot holding them is on disk

    async fn record_relocation(&self, data_set_id: &str, share_id: &str, size: u64) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.inner.snapshot();
        let record = records
            .iter_mut()
            .find(|r| r.id == data_set_id)
            .ok_or_else(|| SegStoreError::DataSetNotFound(data_set_id.to_string()))?;
        record.share_id = Some(share_id.to_string());
        record.size = Some(size);

        self.write_snapshot(&records).await?;
        self.inner
            .record_relocation(data_set_id, share_id, size)
            .await
    }

    async fn release_from_share(&self, data_set_ids: &[String]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut records = self.inner.snapshot();
        for record in records.iter_mut().filter(|r| data_set_ids.contains(&r.id)) {
            record.share_id = None;
        }

        self.write_snapshot(&records).await?;
        self.inner.release_from_share(data_set_ids).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::Hierarchy;
    use tempfile::TempDir;

    fn write_snapshot(path: &Path, records: &[DataSetRecord]) {
        std::fs::write(path, serde_json::to_string(records).unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let catalog = JsonCatalog::open(temp.path().join("catalog.json")).unwrap();
        assert!(catalog.is_empty());
    }

    #[tokio::test]
    async fn test_relocation_is_written_back() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");
        let record = DataSetRecord::new("ds1", Hierarchy::new("S", "P", "E", "RAW"))
            .with_size(10)
            .on_share("1");
        write_snapshot(&path, &[record]);

        let catalog = JsonCatalog::open(&path).unwrap();
        catalog.record_relocation("ds1", "3", 11).await.unwrap();

        let reopened = JsonCatalog::open(&path).unwrap();
        assert_eq!(reopened.current_share("ds1").await.unwrap().as_deref(), Some("3"));
        assert_eq!(reopened.resolve_size("ds1").await.unwrap(), Some(11));
        assert!(!temp.path().join("catalog.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_failed_write_leaves_catalog_unchanged() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("catalog.json");
        let record = DataSetRecord::new("ds1", Hierarchy::new("S", "P", "E", "RAW"))
            .with_size(10)
            .on_share("1");
        write_snapshot(&path, &[record]);

        let catalog = JsonCatalog::open(&path).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        assert!(catalog.record_relocation("ds1", "3", 11).await.is_err());
        assert_eq!(catalog.current_share("ds1").await.unwrap().as_deref(), Some("1"));
        assert_eq!(catalog.resolve_size("ds1").await.unwrap(), Some(10));

        assert!(catalog.release_from_share(&["ds1".to_string()]).await.is_err());
        assert_eq!(catalog.current_share("ds1").await.unwrap().as_deref(), Some("1"));

        // Once the directory is back the change goes through
        std::fs::create_dir_all(&dir).unwrap();
        catalog.record_relocation("ds1", "3", 11).await.unwrap();
        let reopened = JsonCatalog::open(&path).unwrap();
        assert_eq!(reopened.current_share("ds1").await.unwrap().as_deref(), Some("3"));
    }

    #[tokio::test]
    async fn test_relocation_of_unknown_data_set() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");
        let catalog = JsonCatalog::open(&path).unwrap();
        let err = catalog.record_relocation("nope", "3", 1).await.unwrap_err();
        assert!(matches!(err, SegStoreError::DataSetNotFound(_)));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_invalid_snapshot() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.json");
        std::fs::write(&path, b"{ not json").unwrap();
        assert!(JsonCatalog::open(&path).is_err());
    }
}
