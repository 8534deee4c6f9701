//! Balancing / shuffling engine
//!
//! For every source share below its free-space threshold the engine works
//! out the shortfall and relocates data sets, largest first, until the
//! shortfall is covered or the share has no more data sets. A withdrawing
//! share is emptied completely.
//!
//! Each relocation is independent and best effort: a data set without a
//! target or with a failed transfer is logged and skipped, the pass goes on.
//! A catalog error aborts the evacuation of the current source only.
//!
//! In dry-run mode nothing moves, so the bytes of every planned relocation
//! are tracked for the rest of the pass and corrected into the free space
//! of both its source and its destination.

use crate::locks::DataSetLocks;
use crate::metrics;
use crate::selector::{PlannedMoves, TargetSelector};
use segstore_core::{
    display_size, CandidateFilter, CatalogAccess, DataSetRecord, FreeSpaceProvider,
    RelocationOrder, Result, Share, TransferExecutor, DEFAULT_MIN_FREE_BYTES,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

/// Balancer configuration
#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// Free space every source share should have
    pub min_free_bytes: u64,
    /// Plan and log only
    pub dry_run: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            min_free_bytes: DEFAULT_MIN_FREE_BYTES,
            dry_run: false,
        }
    }
}

/// How much a source has to shed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Evacuation {
    /// Withdrawing share, every data set leaves
    All,
    /// Bytes missing to reach the threshold
    Shortfall(u64),
}

/// A relocation that did not complete
#[derive(Debug, Clone)]
pub struct RelocationFailure {
    pub order: RelocationOrder,
    pub error: String,
}

/// Result of one balancing pass
#[derive(Debug, Clone, Default)]
pub struct BalancingReport {
    /// Sources that needed evacuation
    pub sources_evacuated: usize,
    /// Completed relocations, or planned ones in dry-run mode
    pub orders: Vec<RelocationOrder>,
    /// Verified bytes moved
    pub bytes_moved: u64,
    /// Relocations that failed
    pub failures: Vec<RelocationFailure>,
    /// Data sets for which no target was found
    pub no_target: Vec<String>,
    /// Data sets that moved or disappeared while the pass was running
    pub stale: Vec<String>,
    /// Sources whose evacuation was aborted, with the reason
    pub source_errors: Vec<(String, String)>,
    pub duration: Duration,
}

impl BalancingReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.source_errors.is_empty()
    }

    /// Get summary string
    pub fn summary(&self) -> String {
        format!(
            "{} sources evacuated, {} relocations ({}), {} failed, {} without target, {} stale, {} source errors in {:?}",
            self.sources_evacuated,
            self.orders.len(),
            display_size(self.bytes_moved),
            self.failures.len(),
            self.no_target.len(),
            self.stale.len(),
            self.source_errors.len(),
            self.duration
        )
    }
}

/// Outcome of one data set relocation attempt
enum Outcome {
    Relocated(RelocationOrder, u64),
    Planned(RelocationOrder),
    NoTarget,
    Stale,
    Failed(RelocationOrder, String),
}

/// Balancing engine
pub struct Balancer {
    config: BalancerConfig,
    catalog: Arc<dyn CatalogAccess>,
    free_space: Arc<dyn FreeSpaceProvider>,
    transfer: Arc<dyn TransferExecutor>,
    selector: TargetSelector,
    locks: Arc<DataSetLocks>,
}

impl Balancer {
    pub fn new(
        config: BalancerConfig,
        catalog: Arc<dyn CatalogAccess>,
        free_space: Arc<dyn FreeSpaceProvider>,
        transfer: Arc<dyn TransferExecutor>,
        selector: TargetSelector,
    ) -> Self {
        Self {
            config,
            catalog,
            free_space,
            transfer,
            selector,
            locks: Arc::new(DataSetLocks::new()),
        }
    }

    /// Share the lock manager with other actors mutating data sets
    pub fn with_locks(mut self, locks: Arc<DataSetLocks>) -> Self {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &Arc<DataSetLocks> {
        &self.locks
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    /// Run one balancing pass over `sources`, relocating into `targets`
    #[instrument(skip_all, fields(sources = sources.len(), targets = targets.len(), dry_run = self.config.dry_run))]
    pub async fn plan_and_execute(&self, sources: &[Share], targets: &[Share]) -> BalancingReport {
        let start = Instant::now();
        let mut report = BalancingReport::default();
        let mut planned = PlannedMoves::default();

        for source in sources {
            let evacuation = match self.evacuation_of(source, &planned) {
                Ok(Some(evacuation)) => evacuation,
                Ok(None) => continue,
                Err(e) => {
                    error!(share = %source.id, error = %e, "Free space of source unavailable");
                    report.source_errors.push((source.id.clone(), e.to_string()));
                    continue;
                }
            };

            report.sources_evacuated += 1;
            if let Err(e) = self
                .evacuate(source, evacuation, targets, &mut planned, &mut report)
                .await
            {
                error!(share = %source.id, error = %e, "Evacuation of source aborted");
                report.source_errors.push((source.id.clone(), e.to_string()));
            }
        }

        self.locks.prune();
        report.duration = start.elapsed();
        info!(summary = %report.summary(), "Balancing pass complete");
        report
    }

    fn evacuation_of(&self, source: &Share, planned: &PlannedMoves) -> Result<Option<Evacuation>> {
        if source.is_withdrawing() {
            info!(share = %source.id, "Share is withdrawn, moving all data sets");
            return Ok(Some(Evacuation::All));
        }

        let free = self.free_space.free_space(source)?;
        metrics::record_free_space(&source.id, free);
        let free = planned.adjust(&source.id, free);
        if free >= self.config.min_free_bytes {
            debug!(share = %source.id, free = %display_size(free), "Enough free space");
            return Ok(None);
        }

        let shortfall = self.config.min_free_bytes - free;
        info!(
            share = %source.id,
            free = %display_size(free),
            shortfall = %display_size(shortfall),
            "Share below minimum free space"
        );
        Ok(Some(Evacuation::Shortfall(shortfall)))
    }

    /// Data sets of a source in evacuation order: largest first, then by id
    async fn inventory(&self, source: &Share) -> Result<Vec<DataSetRecord>> {
        let listed = self
            .catalog
            .list_candidates(&CandidateFilter::OnShare(source.id.clone()))
            .await?;

        let mut inventory = Vec::with_capacity(listed.len());
        for mut data_set in listed {
            if data_set.size.is_none() {
                data_set.size = self.catalog.resolve_size(&data_set.id).await?;
            }
            match data_set.size {
                Some(_) => inventory.push(data_set),
                None => warn!(data_set = %data_set.id, "Size unknown, data set not moved"),
            }
        }
        inventory.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.id.cmp(&b.id)));
        Ok(inventory)
    }

    async fn evacuate(
        &self,
        source: &Share,
        evacuation: Evacuation,
        targets: &[Share],
        planned: &mut PlannedMoves,
        report: &mut BalancingReport,
    ) -> Result<()> {
        let inventory = self.inventory(source).await?;
        let mut freed = 0u64;

        for data_set in &inventory {
            if let Evacuation::Shortfall(shortfall) = evacuation {
                if freed >= shortfall {
                    break;
                }
            }

            match self.relocate(data_set, source, targets, planned).await? {
                Outcome::Relocated(order, size) => {
                    metrics::record_relocation(&order.source, &order.destination, size);
                    freed += size;
                    report.bytes_moved += size;
                    report.orders.push(order);
                }
                Outcome::Planned(order) => {
                    freed += order.size;
                    report.orders.push(order);
                }
                Outcome::NoTarget => {
                    warn!(
                        data_set = %data_set.id,
                        share = %source.id,
                        size = %display_size(data_set.size.unwrap_or(0)),
                        "No target share found for data set"
                    );
                    metrics::record_skip(&source.id, "no_target");
                    report.no_target.push(data_set.id.clone());
                }
                Outcome::Stale => {
                    metrics::record_skip(&source.id, "stale");
                    report.stale.push(data_set.id.clone());
                }
                Outcome::Failed(order, error) => {
                    error!(order = %order, error = %error, "Relocation failed");
                    metrics::record_failure(&source.id);
                    report.failures.push(RelocationFailure { order, error });
                }
            }
        }

        match evacuation {
            Evacuation::Shortfall(shortfall) if freed < shortfall => warn!(
                share = %source.id,
                freed = %display_size(freed),
                shortfall = %display_size(shortfall),
                "Could not free enough space"
            ),
            Evacuation::All if freed == 0 && !inventory.is_empty() => {
                warn!(share = %source.id, "Nothing could be moved off the withdrawn share")
            }
            _ => info!(share = %source.id, freed = %display_size(freed), "Source evacuated"),
        }
        Ok(())
    }

    async fn relocate(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        targets: &[Share],
        planned: &mut PlannedMoves,
    ) -> Result<Outcome> {
        let Some(target) = self
            .selector
            .select_target_planned(data_set, source, targets, planned)
            .await
        else {
            return Ok(Outcome::NoTarget);
        };
        let order = RelocationOrder {
            data_set_id: data_set.id.clone(),
            source: source.id.clone(),
            destination: target.id.clone(),
            size: data_set.size.unwrap_or(0),
        };

        if self.config.dry_run {
            info!(order = %order, size = %display_size(order.size), "Dry run, relocation not executed");
            planned.record(&order);
            return Ok(Outcome::Planned(order));
        }

        let guard = self.locks.lock(&data_set.id).await?;
        match self.catalog.current_share(&data_set.id).await? {
            Some(home) if home == source.id => {}
            home => {
                info!(
                    data_set = %data_set.id,
                    expected = %source.id,
                    actual = ?home,
                    "Data set has moved or was deleted, skipped"
                );
                return Ok(Outcome::Stale);
            }
        }

        let size = match self.transfer.transfer(data_set, source, target).await {
            Ok(size) => size,
            Err(e) => return Ok(Outcome::Failed(order, e.to_string())),
        };
        if let Err(e) = self
            .catalog
            .record_relocation(&data_set.id, &target.id, size)
            .await
        {
            drop(guard);
            self.discard_copy(data_set, target).await;
            return Err(e);
        }
        drop(guard);
        info!(order = %order, size = %display_size(size), "Data set relocated");

        // Readers that looked up the old home finish before its copy goes away
        self.locks.await_unlocked(&data_set.id).await?;
        if let Err(e) = self.transfer.remove(data_set, source).await {
            warn!(data_set = %data_set.id, share = %source.id, error = %e, "Old copy not removed");
        }
        Ok(Outcome::Relocated(order, size))
    }

    async fn discard_copy(&self, data_set: &DataSetRecord, share: &Share) {
        if let Err(e) = self.transfer.remove(data_set, share).await {
            warn!(data_set = %data_set.id, share = %share.id, error = %e, "Unrecorded copy not removed");
        }
    }
}
