//! Archiving selection task
//!
//! Takes one consistent snapshot of the archival candidates from the catalog,
//! back-fills missing sizes and runs the grouping engine on the result.

use crate::engine::{BatchSelection, GroupingEngine};
use segstore_core::{
    display_size, CandidateFilter, CatalogAccess, DataSetRecord, Result, SegStoreError,
};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Counter of archive batches selected
pub const METRIC_BATCHES_SELECTED: &str = "segstore_archive_batches_selected_total";
/// Counter of data sets put into archive batches
pub const METRIC_BATCH_DATA_SETS: &str = "segstore_archive_batch_data_sets_total";

/// Fill in missing sizes from the catalog.
///
/// Fails with the ids of every data set whose size the catalog cannot supply.
pub async fn resolve_sizes<C>(catalog: &C, candidates: Vec<DataSetRecord>) -> Result<Vec<DataSetRecord>>
where
    C: CatalogAccess + ?Sized,
{
    let mut resolved = Vec::with_capacity(candidates.len());
    let mut unresolvable = Vec::new();
    for mut record in candidates {
        if record.size.is_none() {
            record.size = catalog.resolve_size(&record.id).await?;
            match record.size {
                Some(size) => debug!(data_set = %record.id, size, "Resolved size"),
                None => unresolvable.push(record.id.clone()),
            }
        }
        resolved.push(record);
    }

    if !unresolvable.is_empty() {
        return Err(SegStoreError::UnresolvableSize(unresolvable));
    }
    Ok(resolved)
}

/// Periodic selection of the next archive batch
pub struct ArchivingTask {
    catalog: Arc<dyn CatalogAccess>,
    engine: GroupingEngine,
}

impl ArchivingTask {
    pub fn new(catalog: Arc<dyn CatalogAccess>, engine: GroupingEngine) -> Self {
        Self { catalog, engine }
    }

    pub fn engine(&self) -> &GroupingEngine {
        &self.engine
    }

    /// Select one batch. Archiving it is up to the caller.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> Result<BatchSelection> {
        let candidates = self
            .catalog
            .list_candidates(&CandidateFilter::ArchivalCandidates)
            .await?;
        let candidates = resolve_sizes(self.catalog.as_ref(), candidates).await?;
        let selection = self.engine.select_batch(&candidates)?;

        if !selection.is_empty() {
            metrics::counter!(METRIC_BATCHES_SELECTED).increment(1);
            metrics::counter!(METRIC_BATCH_DATA_SETS).increment(selection.batch.len() as u64);
            info!(
                data_sets = selection.batch.len(),
                size = %display_size(selection.total_size()),
                "Archive batch selected"
            );
        }
        Ok(selection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use segstore_core::Hierarchy;
    use segstore_storage::MemoryCatalog;

    fn ds(unit: &str, id: &str) -> DataSetRecord {
        DataSetRecord::new(id, Hierarchy::new(unit, "p1", "e1", "dt1"))
    }

    #[tokio::test]
    async fn test_resolve_sizes_backfills() {
        let catalog = MemoryCatalog::new();
        catalog.set_known_size("ds1", 42);

        let resolved = resolve_sizes(&catalog, vec![ds("s1", "ds1"), ds("s1", "ds2").with_size(7)])
            .await
            .unwrap();
        assert_eq!(resolved[0].size, Some(42));
        assert_eq!(resolved[1].size, Some(7));
    }

    #[tokio::test]
    async fn test_resolve_sizes_reports_all_failures() {
        let catalog = MemoryCatalog::new();
        let err = resolve_sizes(&catalog, vec![ds("s1", "ds1"), ds("s1", "ds2")])
            .await
            .unwrap_err();
        assert!(matches!(err, SegStoreError::UnresolvableSize(ids) if ids == vec!["ds1", "ds2"]));
    }

    #[tokio::test]
    async fn test_run_once_skips_archived() {
        let catalog = MemoryCatalog::with_records(vec![
            ds("s1", "ds1").with_size(10),
            ds("s1", "ds2").with_size(20).archived(),
            ds("s1", "ds3"),
        ]);
        catalog.set_known_size("ds3", 15);

        let engine = GroupingEngine::from_config(20, 100, "Unit").unwrap();
        let task = ArchivingTask::new(Arc::new(catalog), engine);
        let selection = task.run_once().await.unwrap();

        assert_eq!(selection.ids(), vec!["ds1", "ds3"]);
        assert_eq!(selection.total_size(), 25);
    }

    #[tokio::test]
    async fn test_run_once_fails_on_unresolvable_size() {
        let catalog = MemoryCatalog::with_records(vec![ds("s1", "ds1")]);
        let engine = GroupingEngine::from_config(1, 100, "Unit").unwrap();
        let task = ArchivingTask::new(Arc::new(catalog), engine);
        assert!(task.run_once().await.is_err());
    }
}
