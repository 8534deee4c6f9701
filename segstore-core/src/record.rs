//! Data set records
//!
//! Records are produced by the catalog and are read-only for the engines,
//! apart from the one-time size back-fill before grouping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Organizational position of a data set
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hierarchy {
    /// Organizational unit code
    pub unit: String,
    /// Sub-unit code
    pub sub_unit: String,
    /// Experiment code
    pub experiment: String,
    /// Sample code, not every data set belongs to a sample
    #[serde(default)]
    pub sample: Option<String>,
    /// Data set type code
    pub data_set_type: String,
}

impl Hierarchy {
    pub fn new(
        unit: impl Into<String>,
        sub_unit: impl Into<String>,
        experiment: impl Into<String>,
        data_set_type: impl Into<String>,
    ) -> Self {
        Self {
            unit: unit.into(),
            sub_unit: sub_unit.into(),
            experiment: experiment.into(),
            sample: None,
            data_set_type: data_set_type.into(),
        }
    }

    pub fn with_sample(mut self, sample: impl Into<String>) -> Self {
        self.sample = Some(sample.into());
        self
    }
}

/// A large immutable data set as known to the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSetRecord {
    /// Unique, immutable identifier
    pub id: String,
    /// Size in bytes, `None` until resolved against the catalog
    #[serde(default)]
    pub size: Option<u64>,
    pub hierarchy: Hierarchy,
    /// Last access. `None` sorts before every timestamp (oldest possible).
    #[serde(default)]
    pub access_timestamp: Option<DateTime<Utc>>,
    /// Share currently holding the data set
    #[serde(default)]
    pub share_id: Option<String>,
    /// Path of the data set directory relative to the share root
    #[serde(default)]
    pub location: String,
    /// Whether a copy exists in the archive
    #[serde(default)]
    pub present_in_archive: bool,
}

impl DataSetRecord {
    /// Create a record whose location defaults to its id
    pub fn new(id: impl Into<String>, hierarchy: Hierarchy) -> Self {
        let id = id.into();
        Self {
            location: id.clone(),
            id,
            size: None,
            hierarchy,
            access_timestamp: None,
            share_id: None,
            present_in_archive: false,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_access_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.access_timestamp = Some(timestamp);
        self
    }

    /// Access timestamp in milliseconds since the epoch
    pub fn accessed_at_millis(mut self, millis: i64) -> Self {
        self.access_timestamp = DateTime::<Utc>::from_timestamp_millis(millis);
        self
    }

    pub fn on_share(mut self, share_id: impl Into<String>) -> Self {
        self.share_id = Some(share_id.into());
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    pub fn archived(mut self) -> Self {
        self.present_in_archive = true;
        self
    }

    /// Directory of the data set relative to its share root
    pub fn relative_path(&self) -> &str {
        if self.location.is_empty() {
            &self.id
        } else {
            &self.location
        }
    }

    /// Whether the data set currently lives on the given share
    pub fn is_homed_on(&self, share_id: &str) -> bool {
        self.share_id.as_deref() == Some(share_id)
    }
}

/// Comma separated ids, used in log lines
pub fn id_list<'a>(data_sets: impl IntoIterator<Item = &'a DataSetRecord>) -> String {
    let ids: Vec<&str> = data_sets.into_iter().map(|d| d.id.as_str()).collect();
    format!("[{}]", ids.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_defaults_to_id() {
        let record = DataSetRecord::new("20240101-17", Hierarchy::new("s", "p", "e", "t"));
        assert_eq!(record.location, "20240101-17");
        assert!(record.size.is_none());
        assert!(record.access_timestamp.is_none());
    }

    #[test]
    fn test_missing_timestamp_is_oldest() {
        let h = Hierarchy::new("s", "p", "e", "t");
        let never = DataSetRecord::new("a", h.clone());
        let touched = DataSetRecord::new("b", h).accessed_at_millis(0);
        assert!(never.access_timestamp < touched.access_timestamp);
    }

    #[test]
    fn test_json_defaults() {
        let json = r#"{
            "id": "ds1",
            "hierarchy": {"unit": "S", "sub_unit": "P", "experiment": "E", "data_set_type": "RAW"}
        }"#;
        let record: DataSetRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.id, "ds1");
        assert_eq!(record.hierarchy.sample, None);
        assert!(!record.present_in_archive);
        assert_eq!(record.location, "");
        assert_eq!(record.relative_path(), "ds1");
    }

    #[test]
    fn test_id_list() {
        let h = Hierarchy::new("s", "p", "e", "t");
        let records = vec![DataSetRecord::new("ds1", h.clone()), DataSetRecord::new("ds2", h)];
        assert_eq!(id_list(&records), "[ds1, ds2]");
    }
}
