//! Storage error types
//!
//! Defines all errors that can occur in the status store.

use thiserror::Error;

/// Errors that can occur in the status store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A log line could not be decoded into a record
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// The checked-at field is not a valid RFC 3339 timestamp
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(#[from] chrono::ParseError),

    /// The target field is not a valid URL
    #[error("Invalid target URL: {0}")]
    InvalidTarget(#[from] url::ParseError),

    /// An index append did not continue where the previous period ended.
    ///
    /// The log was truncated or rotated behind our back; the index must be
    /// reset and rebuilt from offset 0.
    #[error("Stale index: append starts at {start} but previous period ends at {expected}")]
    StaleIndex { start: u64, expected: u64 },

    /// The background writer has already shut down
    #[error("Store is closed")]
    Closed,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether this error means the index no longer matches the file.
    pub fn is_stale_index(&self) -> bool {
        matches!(self, StorageError::StaleIndex { .. })
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::InvalidRecord("missing fields".to_string());
        assert_eq!(err.to_string(), "Invalid record: missing fields");

        let err = StorageError::StaleIndex {
            start: 0,
            expected: 100,
        };
        assert_eq!(
            err.to_string(),
            "Stale index: append starts at 0 but previous period ends at 100"
        );
        assert!(err.is_stale_index());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(!storage_err.is_stale_index());
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: StorageError = chrono::DateTime::parse_from_rfc3339("yesterday")
            .unwrap_err()
            .into();
        assert!(matches!(err, StorageError::InvalidTimestamp(_)));

        let err: StorageError = url::Url::parse("no scheme").unwrap_err().into();
        assert!(matches!(err, StorageError::InvalidTarget(_)));
    }
}
