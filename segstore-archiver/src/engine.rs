//! Archive grouping engine
//!
//! Turns a flat list of archival candidates into one batch whose total size
//! fits a size window. The pipeline of grouping keys is tried in order:
//!
//! 1. Partition the candidates by the compound key.
//! 2. Classify each group as too small, matching or too large.
//! 3. Several matching groups: take the coldest one (ties by key).
//! 4. No matching group but merging allowed: merge all groups that are too
//!    small and take the result if it fits.
//! 5. Otherwise continue with the next key.
//!
//! The engine is a pure function of its inputs. It neither copies nor
//! deletes anything.

use crate::group::{partition, CandidateGroup};
use crate::key::{GroupKeySpec, Pipeline};
use crate::trace::DecisionTrace;
use chrono::{DateTime, Utc};
use segstore_core::{
    display_size, id_list, DataSetRecord, Result, SegStoreError, SizeFit, SizeWindow,
};
use tracing::{debug, instrument};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Outcome of trying one grouping key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpecAttempt {
    /// A group fits the window
    MatchFound(CandidateGroup),
    /// Groups are too small and merging is not allowed or not possible
    ShortfallNoMerge,
    /// Merged groups are still below the minimum
    ShortfallAfterMerge { groups: usize, size: u64 },
    /// Merged groups exceed the maximum
    OverflowAfterMerge { groups: usize, size: u64 },
    /// Every group is too large
    NoGroups,
}

/// Result of one grouping run
#[derive(Debug, Clone, Default)]
pub struct BatchSelection {
    /// Selected data sets, empty if nothing qualifies
    pub batch: Vec<DataSetRecord>,
    /// Grouping key that produced the batch
    pub spec: Option<GroupKeySpec>,
    /// Recorded decision lines
    pub trace: Vec<String>,
    /// Text of the no-result warning, if one was emitted
    pub report: Option<String>,
}

impl BatchSelection {
    pub fn is_empty(&self) -> bool {
        self.batch.is_empty()
    }

    pub fn total_size(&self) -> u64 {
        self.batch.iter().filter_map(|d| d.size).sum()
    }

    /// Ids of the selected data sets
    pub fn ids(&self) -> Vec<&str> {
        self.batch.iter().map(|d| d.id.as_str()).collect()
    }
}

/// Selects archive batches for a fixed window and pipeline
#[derive(Debug, Clone)]
pub struct GroupingEngine {
    window: SizeWindow,
    pipeline: Pipeline,
}

impl GroupingEngine {
    pub fn new(window: SizeWindow, pipeline: Pipeline) -> Self {
        Self { window, pipeline }
    }

    /// Build from raw configuration values, validating both
    pub fn from_config(min_size: u64, max_size: u64, pipeline: &str) -> Result<Self> {
        let window = SizeWindow::new(min_size, max_size)?;
        let pipeline: Pipeline = pipeline.parse()?;
        Ok(Self::new(window, pipeline))
    }

    pub fn window(&self) -> &SizeWindow {
        &self.window
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Select the next archive batch from a candidate snapshot.
    ///
    /// Every candidate must carry a resolved size.
    #[instrument(skip(self, candidates), fields(candidates = candidates.len(), window = %self.window))]
    pub fn select_batch(&self, candidates: &[DataSetRecord]) -> Result<BatchSelection> {
        if candidates.is_empty() {
            return Ok(BatchSelection::default());
        }
        let unresolved: Vec<String> = candidates
            .iter()
            .filter(|d| d.size.is_none())
            .map(|d| d.id.clone())
            .collect();
        if !unresolved.is_empty() {
            return Err(SegStoreError::UnresolvableSize(unresolved));
        }

        let mut trace = DecisionTrace::new();
        trace.record(format!(
            "Search for a group of data sets with total size between {} and {}. Data sets: {}",
            self.window.display_min(),
            self.window.display_max(),
            id_list(candidates)
        ));

        for spec in self.pipeline.specs() {
            match self.attempt(spec, candidates, &mut trace)? {
                SpecAttempt::MatchFound(group) => {
                    trace.record(format!("filtered data sets: {}", id_list(&group.members)));
                    return Ok(BatchSelection {
                        batch: group.members,
                        spec: Some(spec.clone()),
                        trace: trace.into_lines(),
                        report: None,
                    });
                }
                outcome => debug!(spec = %spec, ?outcome, "Grouping key gave no batch"),
            }
        }

        let report = trace.warn_no_result(&format!(
            "From {} data sets no group could be found to be fit between {} and {}",
            candidates.len(),
            self.window.display_min(),
            self.window.display_max()
        ));
        Ok(BatchSelection {
            batch: Vec::new(),
            spec: None,
            trace: trace.into_lines(),
            report: Some(report),
        })
    }

    fn attempt(
        &self,
        spec: &GroupKeySpec,
        candidates: &[DataSetRecord],
        trace: &mut DecisionTrace,
    ) -> Result<SpecAttempt> {
        let groups = partition(candidates, spec)?;
        trace.record(format!(
            "Grouping key: '{}' has grouped {} data sets into {} groups.",
            spec,
            candidates.len(),
            groups.len()
        ));

        let mut matching = Vec::new();
        let mut too_small = Vec::new();
        let mut too_large = 0;
        for group in groups {
            match group.fit(&self.window) {
                SizeFit::Match => matching.push(group),
                SizeFit::TooSmall => too_small.push(group),
                SizeFit::TooLarge => too_large += 1,
            }
        }
        trace.record(format!(
            "{} groups match in size, {} groups are too small and {} groups are too large.",
            matching.len(),
            too_small.len(),
            too_large
        ));

        if !matching.is_empty() {
            let several = matching.len() > 1;
            matching.sort_by(CandidateGroup::cmp_by_coldness);
            let coldest = matching.swap_remove(0);
            if several {
                trace.record(oldest_access_line(coldest.coldness));
            }
            return Ok(SpecAttempt::MatchFound(coldest));
        }

        // A single group is already known to be too small
        if !spec.merge() || too_small.len() < 2 {
            return Ok(if too_small.is_empty() {
                SpecAttempt::NoGroups
            } else {
                SpecAttempt::ShortfallNoMerge
            });
        }

        let groups = too_small.len();
        let merged = CandidateGroup::merge(too_small);
        Ok(match merged.fit(&self.window) {
            SizeFit::Match => {
                trace.record(format!("{} groups have been merged.", groups));
                SpecAttempt::MatchFound(merged)
            }
            SizeFit::TooSmall => {
                trace.record(format!(
                    "Merging all {} groups gives a total size of {} which is still below required minimum of {}",
                    groups,
                    display_size(merged.size),
                    self.window.display_min()
                ));
                SpecAttempt::ShortfallAfterMerge {
                    groups,
                    size: merged.size,
                }
            }
            SizeFit::TooLarge => {
                trace.record(format!(
                    "{} groups have been merged, but the total size of {} is above the required maximum of {}",
                    groups,
                    display_size(merged.size),
                    self.window.display_max()
                ));
                SpecAttempt::OverflowAfterMerge {
                    groups,
                    size: merged.size,
                }
            }
        })
    }
}

fn oldest_access_line(coldness: Option<DateTime<Utc>>) -> String {
    match coldness {
        Some(timestamp) => format!(
            "All data sets of the selected group have been accessed at {} or before.",
            timestamp.format(TIMESTAMP_FORMAT)
        ),
        None => "No data set of the selected group has ever been accessed.".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use segstore_core::{Hierarchy, MB};

    fn ds(unit: &str, id: &str, size: u64) -> DataSetRecord {
        DataSetRecord::new(id, Hierarchy::new(unit, "p1", "e1", "dt1")).with_size(size)
    }

    fn ds_full(
        unit: &str,
        sub_unit: &str,
        experiment: &str,
        data_set_type: &str,
        sample: &str,
        id: &str,
        accessed: i64,
        size: u64,
    ) -> DataSetRecord {
        DataSetRecord::new(id, Hierarchy::new(unit, sub_unit, experiment, data_set_type).with_sample(sample))
            .with_size(size)
            .accessed_at_millis(accessed)
    }

    fn engine(min: u64, max: u64, pipeline: &str) -> GroupingEngine {
        GroupingEngine::from_config(min, max, pipeline).unwrap()
    }

    fn by_unit_pipeline() -> &'static str {
        "DataSetType#Space, DataSetType#Project:merge, DataSetType#Experiment:merge, \
         DataSetType#Experiment#Sample:merge, DataSet:merge"
    }

    #[test]
    fn test_empty_candidates_are_silent() {
        let selection = engine(40, 100, "All").select_batch(&[]).unwrap();
        assert!(selection.is_empty());
        assert!(selection.trace.is_empty());
        assert!(selection.report.is_none());
    }

    #[test]
    fn test_simple_match() {
        let candidates = vec![ds("s1", "ds1", 2), ds("s1", "ds2", 8), ds("s1", "ds3", 13)];
        let selection = engine(14, 100, "Unit").select_batch(&candidates).unwrap();

        assert_eq!(selection.ids(), vec!["ds1", "ds2", "ds3"]);
        assert_eq!(selection.total_size(), 23);
        assert_eq!(selection.spec.unwrap().to_string(), "Unit");
        assert_eq!(
            selection.trace,
            vec![
                "Search for a group of data sets with total size between 14 bytes and 100 bytes. \
                 Data sets: [ds1, ds2, ds3]",
                "Grouping key: 'Unit' has grouped 3 data sets into 1 groups.",
                "1 groups match in size, 0 groups are too small and 0 groups are too large.",
                "filtered data sets: [ds1, ds2, ds3]",
            ]
        );
    }

    #[test]
    fn test_shortfall_with_single_group() {
        let candidates = vec![ds("s1", "ds1", 10)];
        let selection = engine(25, 100, "unit:merge").select_batch(&candidates).unwrap();

        assert!(selection.is_empty());
        assert_eq!(
            selection.trace,
            vec![
                "Search for a group of data sets with total size between 25 bytes and 100 bytes. \
                 Data sets: [ds1]",
                "Grouping key: 'Unit:merge' has grouped 1 data sets into 1 groups.",
                "0 groups match in size, 1 groups are too small and 0 groups are too large.",
            ]
        );
        let report = selection.report.unwrap();
        assert_eq!(
            report,
            format!(
                "From 1 data sets no group could be found to be fit between 25 bytes and 100 bytes\n\nLog:\n{}",
                selection.trace.join("\n")
            )
        );
    }

    #[test]
    fn test_merge_succeeds() {
        let candidates = vec![
            ds("s1", "ds1", 10),
            ds("s2", "ds2", 11),
            ds("s3", "ds3", 12),
            ds("s4", "ds4", 13),
        ];
        let selection = engine(25, 100 * MB, "unit:merge").select_batch(&candidates).unwrap();

        assert_eq!(selection.total_size(), 46);
        assert_eq!(selection.ids(), vec!["ds1", "ds2", "ds3", "ds4"]);
        assert!(selection
            .trace
            .contains(&"4 groups have been merged.".to_string()));
    }

    #[test]
    fn test_merge_orders_members_by_coldness() {
        let candidates = vec![
            ds("s1", "ds1", 10).accessed_at_millis(7000),
            ds("s2", "ds2", 11).accessed_at_millis(4000),
            ds("s3", "ds3", 12).accessed_at_millis(6000),
            ds("s4", "ds4", 13).accessed_at_millis(2000),
        ];
        let selection = engine(25, 100 * MB, "Space:merge").select_batch(&candidates).unwrap();
        assert_eq!(selection.ids(), vec!["ds4", "ds2", "ds3", "ds1"]);
    }

    #[test]
    fn test_too_small_without_merge() {
        let candidates = vec![
            ds("s1", "ds1", 10),
            ds("s2", "ds2", 11),
            ds("s3", "ds3", 12),
            ds("s3", "ds4", 1),
        ];
        let selection = engine(25, 100 * MB, "Space").select_batch(&candidates).unwrap();
        assert!(selection.is_empty());
        assert_eq!(
            selection.trace[2],
            "0 groups match in size, 3 groups are too small and 0 groups are too large."
        );
        assert!(selection
            .report
            .unwrap()
            .starts_with("From 4 data sets no group could be found to be fit between 25 bytes and 100 MB"));
    }

    #[test]
    fn test_boundaries_match() {
        let candidates = vec![ds("s1", "ds1", 25), ds("s2", "ds2", 100)];
        let selection = engine(25, 100, "DataSet").select_batch(&candidates).unwrap();
        // Both fit, neither was accessed, so the key decides
        assert_eq!(selection.ids(), vec!["ds1"]);
    }

    #[test]
    fn test_coldest_match_wins() {
        let candidates = vec![
            ds("s1", "ds1", 10).accessed_at_millis(100_000),
            ds("s2", "ds2", 30).accessed_at_millis(200_000),
            ds("s3", "ds3", 26).accessed_at_millis(300_000),
            ds("s4", "ds4", 40).accessed_at_millis(100_000),
            ds("s4", "ds5", 2).accessed_at_millis(50_000),
        ];
        let selection = engine(25, 100, "Space").select_batch(&candidates).unwrap();

        assert_eq!(selection.ids(), vec!["ds4", "ds5"]);
        assert!(selection.trace.contains(
            &"All data sets of the selected group have been accessed at 1970-01-01 00:01:40 or before."
                .to_string()
        ));
    }

    #[test]
    fn test_equal_coldness_tie_broken_by_key() {
        let candidates = vec![
            ds("b", "ds1", 30).accessed_at_millis(1000),
            ds("a", "ds2", 30).accessed_at_millis(1000),
        ];
        let selection = engine(25, 100, "Unit").select_batch(&candidates).unwrap();
        assert_eq!(selection.ids(), vec!["ds2"]);
    }

    #[test]
    fn test_later_spec_used_when_first_fails() {
        let candidates = vec![
            ds_full("s1", "p1", "e1", "dt2", "smp1", "ds1", 0, 10),
            ds_full("s1", "p1", "e1", "dt1", "smp1", "ds2", 0, 11),
            ds_full("s1", "p1", "e1", "dt1", "smp1", "ds3", 0, 12),
            ds_full("s1", "p2", "e1", "dt1", "smp1", "ds4", 0, 13),
            ds_full("s2", "p1", "e1", "dt1", "smp2", "ds5", 0, 14),
        ];
        let selection = engine(20, 30, by_unit_pipeline()).select_batch(&candidates).unwrap();

        assert_eq!(selection.ids(), vec!["ds2", "ds3"]);
        assert_eq!(
            selection.spec.unwrap().to_string(),
            "DataSetType#SubUnit:merge"
        );
        assert_eq!(
            &selection.trace[1..5],
            &[
                "Grouping key: 'DataSetType#Unit' has grouped 5 data sets into 3 groups.",
                "0 groups match in size, 2 groups are too small and 1 groups are too large.",
                "Grouping key: 'DataSetType#SubUnit:merge' has grouped 5 data sets into 4 groups.",
                "1 groups match in size, 3 groups are too small and 0 groups are too large.",
            ]
        );
    }

    #[test]
    fn test_overflow_after_merge_yields_nothing() {
        let candidates = vec![
            ds_full("s1", "p1", "e1", "dt1", "smp1", "ds1", 0, 15),
            ds_full("s1", "p1", "e2", "dt1", "smp1", "ds2", 0, 18),
            ds_full("s1", "p1", "e2", "dt1", "smp2", "ds3", 0, 19),
            ds_full("s1", "p2", "e1", "dt2", "smp1", "ds4", 0, 16),
            ds_full("s1", "p2", "e2", "dt2", "smp1", "ds5", 0, 18),
            ds_full("s1", "p2", "e2", "dt2", "smp2", "ds6", 0, 19),
        ];
        let selection = engine(20, 30, by_unit_pipeline()).select_batch(&candidates).unwrap();

        assert!(selection.is_empty());
        assert!(selection.trace.contains(
            &"6 groups have been merged, but the total size of 105 bytes is above the required maximum of 30 bytes"
                .to_string()
        ));
    }

    #[test]
    fn test_merge_still_too_small() {
        let candidates = vec![
            ds("s1", "ds1", 5 * 1024),
            ds("s2", "ds2", 6 * 1024),
            ds("s3", "ds3", 6 * 1024 + 500),
        ];
        let selection = engine(20 * 1024, 30 * 1024, "Space:merge")
            .select_batch(&candidates)
            .unwrap();

        assert!(selection.is_empty());
        assert_eq!(
            selection.trace[3],
            "Merging all 3 groups gives a total size of 17 KB which is still below required minimum of 20 KB"
        );
    }

    #[test]
    fn test_unresolved_size_fails_whole_call() {
        let candidates = vec![
            ds("s1", "ds1", 10),
            DataSetRecord::new("ds2", Hierarchy::new("s1", "p1", "e1", "dt1")),
        ];
        let err = engine(1, 100, "Unit").select_batch(&candidates).unwrap_err();
        assert!(matches!(err, SegStoreError::UnresolvableSize(ids) if ids == vec!["ds2"]));
    }

    #[test]
    fn test_invalid_configuration() {
        assert!(matches!(
            GroupingEngine::from_config(30, 20, "Unit").unwrap_err(),
            SegStoreError::InvalidWindow { .. }
        ));
        assert!(matches!(
            GroupingEngine::from_config(20, 30, "Unit:merg").unwrap_err(),
            SegStoreError::Configuration(_)
        ));
    }

    fn candidate_strategy() -> impl Strategy<Value = Vec<DataSetRecord>> {
        prop::collection::vec((0usize..4, 0usize..3, 0u64..60, 0i64..1000), 0..20).prop_map(
            |specs| {
                specs
                    .into_iter()
                    .enumerate()
                    .map(|(i, (unit, dt, size, accessed))| {
                        DataSetRecord::new(
                            format!("ds{}", i),
                            Hierarchy::new(format!("s{}", unit), "p", "e", format!("dt{}", dt)),
                        )
                        .with_size(size)
                        .accessed_at_millis(accessed)
                    })
                    .collect()
            },
        )
    }

    proptest! {
        #[test]
        fn prop_batch_respects_window(candidates in candidate_strategy(), min in 0u64..150, span in 0u64..150) {
            let engine = engine(min, min + span, "Unit, DataSetType#Unit:merge, DataSet:merge");
            let selection = engine.select_batch(&candidates).unwrap();
            if !selection.is_empty() {
                prop_assert!(engine.window().contains(selection.total_size()));
            }
        }

        #[test]
        fn prop_selection_is_deterministic(candidates in candidate_strategy(), min in 0u64..150) {
            let engine = engine(min, min + 50, "DataSetType:merge, Unit:merge");
            let first = engine.select_batch(&candidates).unwrap();
            let second = engine.select_batch(&candidates).unwrap();
            prop_assert_eq!(first.batch, second.batch);
            prop_assert_eq!(first.trace, second.trace);
        }
    }
}
