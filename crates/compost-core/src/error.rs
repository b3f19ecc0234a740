//! Error types for compost-core.
//!
//! Sensor errors never escape [`crate::SampleSource::sample`]: the source logs
//! them and substitutes the last good value for the failed channel. They are
//! still typed so that backends and tests can tell failures apart.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::Channel;

/// Errors raised by sensor backends.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// A channel could not be read or produced an implausible value.
    #[error("Sensor read failed on {channel}: {reason}")]
    SensorRead {
        /// Channel that failed.
        channel: Channel,
        /// Description of the failure.
        reason: String,
    },

    /// The blocking probe conversion did not finish in time.
    #[error("{channel} conversion timed out after {timeout:?}")]
    ConversionTimeout {
        /// Channel that timed out.
        channel: Channel,
        /// The bound that was exceeded.
        timeout: Duration,
    },

    /// A sysfs attribute could not be read.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path of the attribute.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
}

impl Error {
    /// Shorthand for a [`Error::SensorRead`].
    pub fn read(channel: Channel, reason: impl Into<String>) -> Self {
        Error::SensorRead {
            channel,
            reason: reason.into(),
        }
    }
}

/// Result type for compost-core operations.
pub type Result<T> = std::result::Result<T, Error>;
