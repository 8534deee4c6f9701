//! Target share selection
//!
//! Picks the destination of one relocation. A candidate survives when it
//! may receive data, is neither the source nor the home of the data set,
//! keeps its minimum free space after taking the data set and passes the
//! speed probe. The survivor with the most free space wins; equal free
//! space goes to the lowest share id.
//!
//! Free space is read live for every candidate on every call. Moves that
//! were only planned (dry run) are laid over the live value.

use segstore_core::{
    display_size, DataSetRecord, FreeSpaceProvider, RelocationOrder, Share, TargetSpeedProbe,
};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Bytes planned to enter and leave each share without being moved yet
#[derive(Debug, Clone, Default)]
pub struct PlannedMoves {
    incoming: HashMap<String, u64>,
    outgoing: HashMap<String, u64>,
}

impl PlannedMoves {
    pub fn record(&mut self, order: &RelocationOrder) {
        *self.incoming.entry(order.destination.clone()).or_default() += order.size;
        *self.outgoing.entry(order.source.clone()).or_default() += order.size;
    }

    /// Free space of `share_id` once the planned moves are done
    pub fn adjust(&self, share_id: &str, live_free: u64) -> u64 {
        let incoming = self.incoming.get(share_id).copied().unwrap_or(0);
        let outgoing = self.outgoing.get(share_id).copied().unwrap_or(0);
        live_free.saturating_add(outgoing).saturating_sub(incoming)
    }
}

pub struct TargetSelector {
    free_space: Arc<dyn FreeSpaceProvider>,
    probe: Arc<dyn TargetSpeedProbe>,
    /// Free space a target must keep after receiving the data set
    min_free_bytes: u64,
}

impl TargetSelector {
    pub fn new(
        free_space: Arc<dyn FreeSpaceProvider>,
        probe: Arc<dyn TargetSpeedProbe>,
        min_free_bytes: u64,
    ) -> Self {
        Self {
            free_space,
            probe,
            min_free_bytes,
        }
    }

    pub fn probe_name(&self) -> &str {
        self.probe.name()
    }

    /// Best target for `data_set` leaving `source`, `None` if no candidate qualifies.
    ///
    /// The data set size must be resolved; an unknown size counts as zero.
    pub async fn select_target<'a>(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        candidates: &'a [Share],
    ) -> Option<&'a Share> {
        self.select_target_planned(data_set, source, candidates, &PlannedMoves::default())
            .await
    }

    /// Like [`select_target`](Self::select_target), with the free space of
    /// every candidate corrected by `planned`
    pub async fn select_target_planned<'a>(
        &self,
        data_set: &DataSetRecord,
        source: &Share,
        candidates: &'a [Share],
        planned: &PlannedMoves,
    ) -> Option<&'a Share> {
        let size = data_set.size.unwrap_or(0);
        let mut best: Option<(&'a Share, u64)> = None;

        for candidate in candidates {
            if candidate.id == source.id || data_set.is_homed_on(&candidate.id) {
                continue;
            }
            if !candidate.accepts_new_data() {
                debug!(share = %candidate.id, "Share does not accept new data");
                continue;
            }

            let free = match self.free_space.free_space(candidate) {
                Ok(free) => planned.adjust(&candidate.id, free),
                Err(e) => {
                    debug!(share = %candidate.id, error = %e, "Free space unavailable");
                    continue;
                }
            };
            if free < size || free - size < self.min_free_bytes {
                debug!(
                    data_set = %data_set.id,
                    share = %candidate.id,
                    free = %display_size(free),
                    size = %display_size(size),
                    "Not enough free space"
                );
                continue;
            }
            if !self.probe.accepts(data_set, candidate).await {
                debug!(
                    data_set = %data_set.id,
                    share = %candidate.id,
                    probe = %self.probe.name(),
                    "Rejected by speed probe"
                );
                continue;
            }

            let better = match best {
                None => true,
                Some((current, current_free)) => match free.cmp(&current_free) {
                    Ordering::Greater => true,
                    Ordering::Equal => candidate.cmp_by_id(current) == Ordering::Less,
                    Ordering::Less => false,
                },
            };
            if better {
                best = Some((candidate, free));
            }
        }

        if let Some((target, free)) = best {
            info!(
                data_set = %data_set.id,
                source = %source.id,
                target = %target.id,
                free = %display_size(free),
                "Target share selected"
            );
        }
        best.map(|(target, _)| target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use segstore_core::{Hierarchy, MB};
    use segstore_storage::MemoryCatalog;
    use std::collections::HashSet;

    /// Rejects the listed shares
    struct RejectProbe(HashSet<String>);

    #[async_trait]
    impl TargetSpeedProbe for RejectProbe {
        fn name(&self) -> &str {
            "reject"
        }

        async fn accepts(&self, _data_set: &DataSetRecord, candidate: &Share) -> bool {
            !self.0.contains(&candidate.id)
        }
    }

    fn setup(capacities: &[(&str, u64)], rejected: &[&str]) -> (TargetSelector, Vec<Share>) {
        let catalog = Arc::new(MemoryCatalog::new());
        let mut shares = Vec::new();
        for (id, capacity) in capacities {
            catalog.set_capacity(id, *capacity);
            shares.push(Share::new(*id, format!("/store/{}", id)));
        }
        let probe = RejectProbe(rejected.iter().map(|s| s.to_string()).collect());
        (TargetSelector::new(catalog, Arc::new(probe), 0), shares)
    }

    fn data_set(size: u64) -> DataSetRecord {
        DataSetRecord::new("ds1", Hierarchy::new("S", "P", "E", "RAW"))
            .with_size(size)
            .on_share("1")
    }

    #[tokio::test]
    async fn test_best_fit_skips_probe_rejection() {
        let (selector, shares) = setup(&[("1", 0), ("2", 10 * MB), ("3", 0), ("4", 30 * MB)], &["3"]);
        let target = selector
            .select_target(&data_set(MB), &shares[0], &shares)
            .await
            .unwrap();
        assert_eq!(target.id, "4");
    }

    #[tokio::test]
    async fn test_probe_can_override_free_space() {
        let (selector, shares) = setup(&[("1", 0), ("2", 10 * MB), ("3", 30 * MB)], &["3"]);
        let target = selector
            .select_target(&data_set(MB), &shares[0], &shares)
            .await
            .unwrap();
        assert_eq!(target.id, "2");
    }

    #[tokio::test]
    async fn test_never_selects_home_or_source() {
        let (selector, shares) = setup(&[("1", 100 * MB), ("2", 10 * MB)], &[]);
        let target = selector
            .select_target(&data_set(MB), &shares[0], &shares)
            .await
            .unwrap();
        assert_eq!(target.id, "2");

        let only_home = &shares[..1];
        assert!(selector
            .select_target(&data_set(MB), &shares[0], only_home)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_rejects_withdrawing_and_full_shares() {
        let (selector, mut shares) = setup(&[("1", 0), ("2", 100 * MB), ("3", 5 * MB)], &[]);
        shares[1] = shares[1].clone().withdrawing();
        assert!(selector
            .select_target(&data_set(10 * MB), &shares[0], &shares)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_minimum_free_after_placement() {
        let catalog = Arc::new(MemoryCatalog::new());
        catalog.set_capacity("2", 15 * MB);
        let shares = vec![Share::new("1", "/store/1"), Share::new("2", "/store/2")];

        let strict = TargetSelector::new(catalog.clone(), Arc::new(crate::AcceptAllProbe), 6 * MB);
        assert!(strict
            .select_target(&data_set(10 * MB), &shares[0], &shares)
            .await
            .is_none());

        let relaxed = TargetSelector::new(catalog, Arc::new(crate::AcceptAllProbe), 5 * MB);
        assert_eq!(
            relaxed
                .select_target(&data_set(10 * MB), &shares[0], &shares)
                .await
                .unwrap()
                .id,
            "2"
        );
    }

    #[tokio::test]
    async fn test_planned_moves_reduce_free_space() {
        let (selector, shares) = setup(&[("1", 0), ("2", 30 * MB), ("3", 20 * MB)], &[]);
        let mut planned = PlannedMoves::default();
        planned.record(&RelocationOrder {
            data_set_id: "ds0".to_string(),
            source: "1".to_string(),
            destination: "2".to_string(),
            size: 25 * MB,
        });
        assert_eq!(planned.adjust("2", 30 * MB), 5 * MB);
        assert_eq!(planned.adjust("1", 0), 25 * MB);

        let target = selector
            .select_target_planned(&data_set(10 * MB), &shares[0], &shares, &planned)
            .await
            .unwrap();
        assert_eq!(target.id, "3");
    }

    #[tokio::test]
    async fn test_equal_free_space_prefers_lowest_id() {
        let (selector, shares) = setup(&[("1", 0), ("10", 20 * MB), ("9", 20 * MB)], &[]);
        let target = selector
            .select_target(&data_set(MB), &shares[0], &shares)
            .await
            .unwrap();
        assert_eq!(target.id, "9");
    }
}
