//! Error types for SegStore
//!
//! Provides a unified error type for all SegStore operations.

use thiserror::Error;

/// Result type alias for SegStore operations
pub type Result<T> = std::result::Result<T, SegStoreError>;

/// Unified error type for SegStore
#[derive(Error, Debug)]
pub enum SegStoreError {
    // ===== Size Errors =====
    #[error("Unknown size of data set '{0}'")]
    UnknownSize(String),

    #[error("Size of {} data set(s) could not be resolved: {}", .0.len(), .0.join(", "))]
    UnresolvableSize(Vec<String>),

    #[error("Invalid size window: minimum {min} is above maximum {max}")]
    InvalidWindow { min: u64, max: u64 },

    // ===== Catalog Errors =====
    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Data set not found: {0}")]
    DataSetNotFound(String),

    #[error("Share not found: {0}")]
    ShareNotFound(String),

    // ===== Transfer Errors =====
    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Transfer of '{0}' timed out")]
    TransferTimeout(String),

    // ===== Share Errors =====
    #[error("Share '{share_id}' is not an unarchiving scratch share")]
    NotAScratchShare { share_id: String },

    #[error("Scratch share '{share_id}' exhausted: {free} bytes free after eviction, {requested} bytes requested")]
    ScratchExhausted {
        share_id: String,
        free: u64,
        requested: u64,
    },

    // ===== I/O Errors =====
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // ===== Serialization Errors =====
    #[error("Serialization error: {0}")]
    Serialization(String),

    // ===== Configuration Errors =====
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ===== Generic Errors =====
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SegStoreError {
    /// Whether the error only affects a single item and the pass may go on
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            SegStoreError::Transfer(_)
                | SegStoreError::Verification(_)
                | SegStoreError::TransferTimeout(_)
                | SegStoreError::DataSetNotFound(_)
        )
    }
}

impl From<serde_json::Error> for SegStoreError {
    fn from(err: serde_json::Error) -> Self {
        SegStoreError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for SegStoreError {
    fn from(err: toml::de::Error) -> Self {
        SegStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SegStoreError::InvalidWindow { min: 30, max: 20 };
        assert_eq!(
            err.to_string(),
            "Invalid size window: minimum 30 is above maximum 20"
        );
    }

    #[test]
    fn test_unresolvable_lists_ids() {
        let err = SegStoreError::UnresolvableSize(vec!["ds1".to_string(), "ds7".to_string()]);
        assert_eq!(
            err.to_string(),
            "Size of 2 data set(s) could not be resolved: ds1, ds7"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: SegStoreError = io_err.into();
        assert!(matches!(err, SegStoreError::Io(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_transfer_errors_are_recoverable() {
        assert!(SegStoreError::Transfer("rsync exited 23".to_string()).is_recoverable());
        assert!(SegStoreError::TransferTimeout("ds1".to_string()).is_recoverable());
        assert!(!SegStoreError::UnknownSize("ds1".to_string()).is_recoverable());
    }
}
