//! Size windows
//!
//! An inclusive `[min, max]` byte range that an archive batch or a
//! relocation target has to satisfy.

use crate::error::{Result, SegStoreError};
use crate::size::display_size;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a size falls relative to a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeFit {
    TooSmall,
    Match,
    TooLarge,
}

/// Inclusive size window. `max == u64::MAX` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawSizeWindow")]
pub struct SizeWindow {
    min: u64,
    max: u64,
}

/// Unchecked bounds as they appear in serialized form
#[derive(Deserialize)]
struct RawSizeWindow {
    min: u64,
    max: u64,
}

impl TryFrom<RawSizeWindow> for SizeWindow {
    type Error = SegStoreError;

    fn try_from(raw: RawSizeWindow) -> Result<Self> {
        SizeWindow::new(raw.min, raw.max)
    }
}

impl SizeWindow {
    /// Create a window, rejecting `min > max`
    pub fn new(min: u64, max: u64) -> Result<Self> {
        if min > max {
            return Err(SegStoreError::InvalidWindow { min, max });
        }
        Ok(Self { min, max })
    }

    /// Window without an upper bound
    pub fn at_least(min: u64) -> Self {
        Self { min, max: u64::MAX }
    }

    pub fn min(&self) -> u64 {
        self.min
    }

    pub fn max(&self) -> u64 {
        self.max
    }

    pub fn is_unbounded(&self) -> bool {
        self.max == u64::MAX
    }

    /// Classify a size. Both boundaries are inclusive.
    pub fn classify(&self, size: u64) -> SizeFit {
        if size < self.min {
            SizeFit::TooSmall
        } else if size > self.max {
            SizeFit::TooLarge
        } else {
            SizeFit::Match
        }
    }

    pub fn contains(&self, size: u64) -> bool {
        self.classify(size) == SizeFit::Match
    }

    /// Lower bound for log lines
    pub fn display_min(&self) -> String {
        display_size(self.min)
    }

    /// Upper bound for log lines
    pub fn display_max(&self) -> String {
        if self.is_unbounded() {
            "unlimited".to_string()
        } else {
            display_size(self.max)
        }
    }
}

impl fmt::Display for SizeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.display_min(), self.display_max())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::size::MB;
    use proptest::prelude::*;

    #[test]
    fn test_rejects_inverted_window() {
        let err = SizeWindow::new(30, 20).unwrap_err();
        assert!(matches!(err, SegStoreError::InvalidWindow { min: 30, max: 20 }));
    }

    #[test]
    fn test_deserialize_checks_bounds() {
        let window: SizeWindow = serde_json::from_str(r#"{"min":20,"max":30}"#).unwrap();
        assert_eq!((window.min(), window.max()), (20, 30));

        let err = serde_json::from_str::<SizeWindow>(r#"{"min":30,"max":20}"#).unwrap_err();
        assert!(err.to_string().contains("minimum 30 is above maximum 20"), "{}", err);
    }

    #[test]
    fn test_boundaries_are_inclusive() {
        let window = SizeWindow::new(25, 100).unwrap();
        assert_eq!(window.classify(24), SizeFit::TooSmall);
        assert_eq!(window.classify(25), SizeFit::Match);
        assert_eq!(window.classify(100), SizeFit::Match);
        assert_eq!(window.classify(101), SizeFit::TooLarge);
    }

    #[test]
    fn test_degenerate_window() {
        let window = SizeWindow::new(40, 40).unwrap();
        assert!(window.contains(40));
        assert!(!window.contains(39));
        assert!(!window.contains(41));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            SizeWindow::new(25, 100 * MB).unwrap().to_string(),
            "[25 bytes, 100 MB]"
        );
        assert_eq!(SizeWindow::at_least(MB).to_string(), "[1 MB, unlimited]");
    }

    proptest! {
        #[test]
        fn prop_classification_is_total(min in 0u64..1_000, span in 0u64..1_000, size in 0u64..3_000) {
            let window = SizeWindow::new(min, min + span).unwrap();
            let fit = window.classify(size);
            prop_assert_eq!(fit == SizeFit::Match, min <= size && size <= min + span);
            prop_assert_eq!(fit == SizeFit::TooSmall, size < min);
        }
    }
}
