//! Error types for data parsing in compost-types.

use thiserror::Error;

/// Errors that can occur when parsing stored telemetry values.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The timestamp is neither a wall-clock time nor an uptime counter.
    #[error("Invalid timestamp: {0:?}")]
    InvalidTimestamp(String),

    /// The delivery status label is unknown.
    #[error("Unknown delivery status: {0:?}")]
    UnknownDeliveryStatus(String),
}

/// Result type alias using compost-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
