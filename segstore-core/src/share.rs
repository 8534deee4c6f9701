//! Shares
//!
//! A share is one capacity-bounded storage root of the segmented store.
//! On disk the shares are the numerically named sub-directories of the
//! store root, each optionally carrying a `share.toml` with its properties:
//!
//! ```toml
//! withdraw = false
//! ignored_for_shuffling = false
//! unarchiving_scratch = false
//! scratch_max_size = 536870912000
//! ```

use crate::error::{Result, SegStoreError};
use crate::record::DataSetRecord;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Name of the per-share properties file
pub const SHARE_PROPS_FILE: &str = "share.toml";

/// Properties of a share
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareProps {
    /// Share is being emptied: it only loses data and never receives any
    pub withdraw: bool,
    /// Share takes no part in balancing at all
    pub ignored_for_shuffling: bool,
    /// Share receives data sets unarchived for temporary access
    pub unarchiving_scratch: bool,
    /// Upper bound of bytes an unarchiving scratch share may hold
    pub scratch_max_size: Option<u64>,
}

/// A storage location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Share {
    pub id: String,
    pub root: PathBuf,
    pub props: ShareProps,
}

impl Share {
    pub fn new(id: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            props: ShareProps::default(),
        }
    }

    pub fn with_props(mut self, props: ShareProps) -> Self {
        self.props = props;
        self
    }

    /// Mark the share as being withdrawn
    pub fn withdrawing(mut self) -> Self {
        self.props.withdraw = true;
        self
    }

    pub fn is_withdrawing(&self) -> bool {
        self.props.withdraw
    }

    /// Whether the share may receive relocated data sets
    pub fn accepts_new_data(&self) -> bool {
        !self.props.withdraw && !self.props.unarchiving_scratch
    }

    pub fn is_unarchiving_scratch(&self) -> bool {
        self.props.unarchiving_scratch
    }

    /// Directory of a data set within this share
    pub fn data_set_dir(&self, data_set: &DataSetRecord) -> PathBuf {
        self.root.join(data_set.relative_path())
    }

    /// Numeric share id, `None` for ids that are not all digits
    pub fn numeric_id(&self) -> Option<u64> {
        self.id.parse().ok()
    }

    /// Ordering by numeric id, non-numeric ids last and lexicographic
    pub fn cmp_by_id(&self, other: &Share) -> Ordering {
        match (self.numeric_id(), other.numeric_id()) {
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.id.cmp(&other.id),
        }
    }
}

/// Which shares a caller is interested in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareFilter {
    All,
    /// Shares that take part in balancing
    AvailableForShuffling,
    /// Unarchiving scratch shares only
    ArchivingScratch,
}

impl ShareFilter {
    pub fn is_selected(&self, share: &Share) -> bool {
        match self {
            ShareFilter::All => true,
            ShareFilter::AvailableForShuffling => {
                !(share.props.ignored_for_shuffling || share.props.unarchiving_scratch)
            }
            ShareFilter::ArchivingScratch => share.props.unarchiving_scratch,
        }
    }
}

fn is_share_dir_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

fn read_props(dir: &Path) -> Result<ShareProps> {
    let path = dir.join(SHARE_PROPS_FILE);
    if !path.is_file() {
        return Ok(ShareProps::default());
    }
    let content = std::fs::read_to_string(&path)?;
    toml::from_str(&content).map_err(|e| {
        SegStoreError::Configuration(format!("Invalid share properties {:?}: {}", path, e))
    })
}

/// List the shares of a store root, sorted by numeric id.
pub fn discover_shares(store_root: &Path, filter: ShareFilter) -> Result<Vec<Share>> {
    let entries = std::fs::read_dir(store_root).map_err(|e| {
        SegStoreError::Configuration(format!(
            "Store folder does not exist or cannot be accessed: {:?} ({})",
            store_root, e
        ))
    })?;

    let mut shares = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !is_share_dir_name(&name) {
            continue;
        }
        let props = match read_props(&entry.path()) {
            Ok(props) => props,
            Err(e) => {
                warn!(share = %name, error = %e, "Ignoring share with unreadable properties");
                continue;
            }
        };
        let share = Share::new(name, entry.path()).with_props(props);
        if filter.is_selected(&share) {
            shares.push(share);
        }
    }

    shares.sort_by(|a, b| a.cmp_by_id(b));
    debug!(store_root = ?store_root, shares = shares.len(), "Discovered shares");
    Ok(shares)
}
