//! Candidate groups

use crate::key::GroupKeySpec;
use chrono::{DateTime, Utc};
use segstore_core::{total_size, DataSetRecord, Result, SizeFit, SizeWindow};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Data sets sharing one compound key value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateGroup {
    pub key: String,
    pub members: Vec<DataSetRecord>,
    /// Exact sum of the member sizes
    pub size: u64,
    /// Most recent access among the members. `None` if no member was ever accessed.
    pub coldness: Option<DateTime<Utc>>,
}

impl CandidateGroup {
    fn from_members(key: String, members: Vec<DataSetRecord>) -> Result<Self> {
        let size = total_size(&members)?;
        let coldness = members.iter().map(|d| d.access_timestamp).max().flatten();
        Ok(Self {
            key,
            members,
            size,
            coldness,
        })
    }

    pub fn fit(&self, window: &SizeWindow) -> SizeFit {
        window.classify(self.size)
    }

    /// Colder groups first, ties by key
    pub fn cmp_by_coldness(&self, other: &CandidateGroup) -> Ordering {
        self.coldness
            .cmp(&other.coldness)
            .then_with(|| self.key.cmp(&other.key))
    }

    /// Concatenate groups into one, coldest group first
    pub fn merge(mut groups: Vec<CandidateGroup>) -> CandidateGroup {
        groups.sort_by(CandidateGroup::cmp_by_coldness);
        let keys: Vec<&str> = groups.iter().map(|g| g.key.as_str()).collect();
        let key = keys.join("+");
        let size = groups.iter().map(|g| g.size).sum();
        let coldness = groups.iter().map(|g| g.coldness).max().flatten();
        let members = groups.into_iter().flat_map(|g| g.members).collect();
        CandidateGroup {
            key,
            members,
            size,
            coldness,
        }
    }
}

/// Partition candidates by the compound key of `spec`.
///
/// Groups are ordered by key; members keep their input order.
pub fn partition(candidates: &[DataSetRecord], spec: &GroupKeySpec) -> Result<Vec<CandidateGroup>> {
    let mut by_key: BTreeMap<String, Vec<DataSetRecord>> = BTreeMap::new();
    for record in candidates {
        by_key
            .entry(spec.key_of(record))
            .or_default()
            .push(record.clone());
    }
    by_key
        .into_iter()
        .map(|(key, members)| CandidateGroup::from_members(key, members))
        .collect()
}
