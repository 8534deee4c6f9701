//! Byte counts for operator-facing log lines

use crate::error::{Result, SegStoreError};
use crate::record::DataSetRecord;

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;
pub const GB: u64 = MB * 1024;
pub const TB: u64 = GB * 1024;

/// Format bytes as human-readable string.
///
/// Values are truncated to whole units (`17 KB`, `100 MB`, `25 bytes`) so the
/// same size always renders the same way in decision logs.
pub fn display_size(bytes: u64) -> String {
    if bytes >= TB {
        format!("{} TB", bytes / TB)
    } else if bytes >= GB {
        format!("{} GB", bytes / GB)
    } else if bytes >= MB {
        format!("{} MB", bytes / MB)
    } else if bytes >= KB {
        format!("{} KB", bytes / KB)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Sum of the sizes of all data sets. Fails on the first data set of unknown size.
pub fn total_size<'a>(data_sets: impl IntoIterator<Item = &'a DataSetRecord>) -> Result<u64> {
    data_sets.into_iter().try_fold(0u64, |sum, data_set| {
        let size = data_set
            .size
            .ok_or_else(|| SegStoreError::UnknownSize(data_set.id.clone()))?;
        Ok(sum.saturating_add(size))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Hierarchy;

    #[test]
    fn test_display_size_units() {
        assert_eq!(display_size(0), "0 bytes");
        assert_eq!(display_size(25), "25 bytes");
        assert_eq!(display_size(1023), "1023 bytes");
        assert_eq!(display_size(17 * KB + 300), "17 KB");
        assert_eq!(display_size(100 * MB), "100 MB");
        assert_eq!(display_size(3 * GB + MB), "3 GB");
        assert_eq!(display_size(2 * TB), "2 TB");
    }

    #[test]
    fn test_total_size() {
        let h = Hierarchy::new("s1", "p1", "e1", "dt1");
        let data_sets = vec![
            DataSetRecord::new("ds1", h.clone()).with_size(10),
            DataSetRecord::new("ds2", h.clone()).with_size(32),
        ];
        assert_eq!(total_size(&data_sets).unwrap(), 42);
    }

    #[test]
    fn test_total_size_unknown() {
        let h = Hierarchy::new("s1", "p1", "e1", "dt1");
        let data_sets = vec![
            DataSetRecord::new("ds1", h.clone()).with_size(10),
            DataSetRecord::new("ds2", h),
        ];
        let err = total_size(&data_sets).unwrap_err();
        assert!(matches!(err, SegStoreError::UnknownSize(id) if id == "ds2"));
    }
}
