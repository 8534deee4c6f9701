//! Scheduler service
//!
//! Wires the engines to their collaborators and runs them periodically.
//! One tick runs a balancing pass over the shares of the store, then
//! selects the next archive batch.

use crate::balancer::{Balancer, BalancerConfig, BalancingReport};
use crate::config::SchedulerConfig;
use crate::locks::DataSetLocks;
use crate::metrics;
use crate::probe::ProbeRegistry;
use crate::scratch::ScratchCleaner;
use crate::selector::TargetSelector;
use segstore_archiver::{ArchivingTask, BatchSelection};
use segstore_core::{
    discover_shares, CatalogAccess, DataSetRecord, FreeSpaceProvider, Result, SegStoreError,
    ShareFilter, TransferExecutor,
};
use segstore_storage::{DiskFreeSpace, JsonCatalog, LocalCopyTransfer};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{error, info, instrument, warn};

/// Outcome of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub shares: usize,
    pub balancing: Option<BalancingReport>,
    pub archive_batch: Option<BatchSelection>,
    pub archiving_error: Option<String>,
}

impl TickReport {
    pub fn summary(&self) -> String {
        let balancing = self
            .balancing
            .as_ref()
            .map(BalancingReport::summary)
            .unwrap_or_else(|| "balancing disabled".to_string());
        let archiving = match (&self.archive_batch, &self.archiving_error) {
            (_, Some(e)) => format!("archiving failed: {}", e),
            (Some(selection), None) if !selection.is_empty() => {
                format!("archive batch of {} data sets", selection.batch.len())
            }
            (Some(_), None) => "no archive batch".to_string(),
            (None, None) => "archiving disabled".to_string(),
        };
        format!("{} shares; {}; {}", self.shares, balancing, archiving)
    }
}

pub struct SchedulerService {
    config: SchedulerConfig,
    store_root: PathBuf,
    balancer: Balancer,
    scratch: ScratchCleaner,
    archiving: Option<ArchivingTask>,
}

impl SchedulerService {
    /// Build the service on the local store and JSON catalog of `config`
    pub fn from_config(config: SchedulerConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| SegStoreError::Configuration(e.to_string()))?;
        let catalog: Arc<dyn CatalogAccess> = Arc::new(JsonCatalog::open(&config.store.catalog)?);
        let free_space: Arc<dyn FreeSpaceProvider> = Arc::new(DiskFreeSpace);
        let transfer: Arc<dyn TransferExecutor> =
            Arc::new(LocalCopyTransfer::new(config.transfer_timeout()));
        Self::with_collaborators(config, catalog, free_space, transfer)
    }

    /// Build the service on arbitrary collaborators
    pub fn with_collaborators(
        config: SchedulerConfig,
        catalog: Arc<dyn CatalogAccess>,
        free_space: Arc<dyn FreeSpaceProvider>,
        transfer: Arc<dyn TransferExecutor>,
    ) -> Result<Self> {
        let balancing = &config.balancing;
        let probe = ProbeRegistry::standard().create(&balancing.speed_probe, &balancing.probe)?;
        let selector = TargetSelector::new(
            free_space.clone(),
            probe,
            balancing.target_min_free_bytes,
        );
        let locks = Arc::new(DataSetLocks::new());
        let balancer = Balancer::new(
            BalancerConfig {
                min_free_bytes: balancing.min_free_bytes,
                dry_run: balancing.dry_run,
            },
            catalog.clone(),
            free_space.clone(),
            transfer.clone(),
            selector,
        )
        .with_locks(locks.clone());
        let scratch = ScratchCleaner::new(catalog.clone(), free_space, transfer, locks);

        let archiving = if config.archiving.enabled {
            let engine = config
                .grouping_engine()
                .map_err(|e| SegStoreError::Configuration(e.to_string()))?;
            Some(ArchivingTask::new(catalog, engine))
        } else {
            None
        };

        Ok(Self {
            store_root: config.store.root.clone(),
            config,
            balancer,
            scratch,
            archiving,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Run one balancing pass followed by one archive batch selection
    #[instrument(skip(self), fields(store = ?self.store_root))]
    pub async fn tick(&self) -> Result<TickReport> {
        let start = Instant::now();
        let shares = discover_shares(&self.store_root, ShareFilter::AvailableForShuffling)?;
        let mut report = TickReport {
            shares: shares.len(),
            ..TickReport::default()
        };

        if self.config.balancing.enabled {
            let targets: Vec<_> = shares
                .iter()
                .filter(|s| s.accepts_new_data())
                .cloned()
                .collect();
            report.balancing = Some(self.balancer.plan_and_execute(&shares, &targets).await);
        }

        if let Some(archiving) = &self.archiving {
            match archiving.run_once().await {
                Ok(selection) => report.archive_batch = Some(selection),
                Err(e) => {
                    error!(error = %e, "Archive batch selection failed");
                    report.archiving_error = Some(e.to_string());
                }
            }
        }

        metrics::record_tick();
        info!(summary = %report.summary(), elapsed = ?start.elapsed(), "Tick complete");
        Ok(report)
    }

    /// Make room for data sets about to be unarchived onto a scratch share
    pub async fn free_scratch_space(
        &self,
        share_id: &str,
        requested: &[DataSetRecord],
    ) -> Result<Vec<DataSetRecord>> {
        let share = discover_shares(&self.store_root, ShareFilter::ArchivingScratch)?
            .into_iter()
            .find(|s| s.id == share_id)
            .ok_or_else(|| SegStoreError::NotAScratchShare {
                share_id: share_id.to_string(),
            })?;
        self.scratch.free_scratch_space(&share, requested).await
    }

    /// Tick every scan interval until Ctrl-C
    pub async fn run(&self) -> anyhow::Result<()> {
        info!(
            scan_interval = ?self.config.scan_interval(),
            dry_run = self.config.balancing.dry_run,
            probe = %self.config.balancing.speed_probe,
            "Scheduler service started"
        );

        let mut interval = tokio::time::interval(self.config.scan_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Tick failed");
                    }
                },
                _ = signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        info!("Scheduler service stopped");
        Ok(())
    }
}
