//! Error types for compost-store.

use std::path::PathBuf;

/// Result type for compost-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in compost-store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to create the log directory.
    #[error("Failed to create log directory {path}: {source}")]
    CreateDirectory {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The medium rejected a write or could not be accessed.
    #[error("Storage unavailable at {path}: {source}")]
    StorageUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The medium (or the configured capacity) has no room for the record.
    #[error("Storage full: {needed} more bytes needed, {available} available")]
    StorageFull { needed: u64, available: u64 },

    /// The log file does not start with the expected header row.
    #[error("Invalid log header in {path}: found {found:?}")]
    InvalidHeader { path: PathBuf, found: String },

    /// The log contents cannot be interpreted.
    #[error("Corrupt log {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    /// CSV encoding or decoding error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the same append may succeed at a later tick.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::StorageFull { .. } | Error::StorageUnavailable { .. }
        )
    }

    /// Classify an IO failure raised while writing to `path`.
    pub(crate) fn from_write(path: &std::path::Path, source: std::io::Error, needed: u64) -> Self {
        use std::io::ErrorKind;

        match source.kind() {
            ErrorKind::StorageFull | ErrorKind::FileTooLarge => {
                Error::StorageFull {
                    needed,
                    available: 0,
                }
            }
            _ => Error::StorageUnavailable {
                path: path.to_path_buf(),
                source,
            },
        }
    }
}
