//! Core types for compost monitor telemetry.

use core::fmt;
use core::str::FromStr;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::error::ParseError;

/// Layout used for wall-clock timestamps in the log and on the wire.
const WALL_CLOCK_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// When a sample was taken.
///
/// Wall-clock time is the device's local civil time: the UTC offset is a
/// device setting and is not stored, so a rendered timestamp parses back to
/// the same value. Devices without a synchronised clock fall back to the
/// number of seconds since the process started. Both forms render as plain
/// strings so that they can share a single CSV column.
///
/// ```
/// use std::time::Duration;
/// use compost_types::Timestamp;
///
/// let ts = Timestamp::from_uptime(Duration::from_millis(42_900));
/// assert_eq!(ts.to_string(), "42");
/// assert!(!ts.is_wall_clock());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timestamp {
    /// Local wall-clock time, truncated to whole seconds.
    WallClock(PrimitiveDateTime),
    /// Seconds since start-up.
    Uptime(u64),
}

impl Timestamp {
    /// Build a wall-clock timestamp from `at` as seen in its own offset,
    /// dropping sub-second precision.
    #[must_use]
    pub fn from_wall_clock(at: OffsetDateTime) -> Self {
        let local = PrimitiveDateTime::new(at.date(), at.time());
        Timestamp::WallClock(local.replace_nanosecond(0).unwrap_or(local))
    }

    /// Build an uptime timestamp from the time elapsed since start-up.
    #[must_use]
    pub fn from_uptime(uptime: Duration) -> Self {
        Timestamp::Uptime(uptime.as_secs())
    }

    /// Whether this timestamp came from a synchronised clock.
    #[must_use]
    pub fn is_wall_clock(&self) -> bool {
        matches!(self, Timestamp::WallClock(_))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::WallClock(at) => {
                let rendered = at.format(WALL_CLOCK_FORMAT).map_err(|_| fmt::Error)?;
                f.write_str(&rendered)
            }
            Timestamp::Uptime(secs) => write!(f, "{}", secs),
        }
    }
}

impl FromStr for Timestamp {
    type Err = ParseError;

    /// Parse either `YYYY-MM-DD HH:MM:SS` local time or a bare number of
    /// seconds.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(secs) = s.parse::<u64>() {
            return Ok(Timestamp::Uptime(secs));
        }
        PrimitiveDateTime::parse(s, WALL_CLOCK_FORMAT)
            .map(Timestamp::WallClock)
            .map_err(|_| ParseError::InvalidTimestamp(s.to_string()))
    }
}

#[cfg(feature = "serde")]
impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One calibrated measurement from the three sensor channels.
///
/// A sample carries no sequence id; the durable log assigns one when the
/// sample is appended, producing a [`Reading`].
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    /// When the channels were read.
    pub timestamp: Timestamp,
    /// Probe temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Substrate humidity, 0-100 %.
    pub humidity_pct: f32,
    /// Methane concentration in ppm.
    pub methane_ppm: f32,
}

/// A sample that has been made durable, identified by its sequence id.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Reading {
    /// Position in the append order, starting at 1.
    pub sequence_id: u64,
    /// When the channels were read.
    pub timestamp: Timestamp,
    /// Probe temperature in degrees Celsius.
    pub temperature_c: f32,
    /// Substrate humidity, 0-100 %.
    pub humidity_pct: f32,
    /// Methane concentration in ppm.
    pub methane_ppm: f32,
}

impl Reading {
    /// Stamp a sample with its sequence id.
    #[must_use]
    pub fn from_sample(sequence_id: u64, sample: Sample) -> Self {
        Self {
            sequence_id,
            timestamp: sample.timestamp,
            temperature_c: sample.temperature_c,
            humidity_pct: sample.humidity_pct,
            methane_ppm: sample.methane_ppm,
        }
    }

    /// The measurement without its id.
    #[must_use]
    pub fn sample(&self) -> Sample {
        Sample {
            timestamp: self.timestamp,
            temperature_c: self.temperature_c,
            humidity_pct: self.humidity_pct,
            methane_ppm: self.methane_ppm,
        }
    }
}

/// Advisory remote-delivery state of a log entry.
///
/// The durable record is the source of truth; this flag never affects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeliveryStatus {
    /// Not yet delivered; still eligible for a retry.
    #[default]
    Pending,
    /// Acknowledged by the remote endpoint.
    Delivered,
    /// Rejected in a way that retrying will not fix.
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Pending => write!(f, "pending"),
            DeliveryStatus::Delivered => write!(f, "delivered"),
            DeliveryStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(DeliveryStatus::Pending),
            "delivered" => Ok(DeliveryStatus::Delivered),
            "failed" => Ok(DeliveryStatus::Failed),
            _ => Err(ParseError::UnknownDeliveryStatus(s.to_string())),
        }
    }
}

/// Outcome of a single remote delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum DeliveryResult {
    /// The endpoint accepted the reading.
    Delivered,
    /// Worth retrying later (network down, timeout, server-side error).
    TransientFailure,
    /// Retrying will not help (the endpoint rejected the payload).
    PermanentFailure,
}

impl DeliveryResult {
    /// Whether a later retry could succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryResult::TransientFailure)
    }
}

impl From<DeliveryResult> for DeliveryStatus {
    fn from(result: DeliveryResult) -> Self {
        match result {
            DeliveryResult::Delivered => DeliveryStatus::Delivered,
            DeliveryResult::TransientFailure => DeliveryStatus::Pending,
            DeliveryResult::PermanentFailure => DeliveryStatus::Failed,
        }
    }
}

/// A durable reading together with its delivery state.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LogEntry {
    /// The durable record.
    pub reading: Reading,
    /// Advisory delivery state.
    pub delivery_status: DeliveryStatus,
}

impl LogEntry {
    /// A freshly appended entry, not yet delivered.
    #[must_use]
    pub fn pending(reading: Reading) -> Self {
        Self {
            reading,
            delivery_status: DeliveryStatus::Pending,
        }
    }

    /// Sequence id of the underlying reading.
    #[must_use]
    pub fn sequence_id(&self) -> u64 {
        self.reading.sequence_id
    }

    /// Record the outcome of a delivery attempt.
    ///
    /// Only the advisory flag changes; the reading itself is immutable.
    pub fn record(&mut self, result: DeliveryResult) {
        self.delivery_status = result.into();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample() -> Sample {
        Sample {
            timestamp: Timestamp::Uptime(12),
            temperature_c: 55.5,
            humidity_pct: 48.0,
            methane_ppm: 310.0,
        }
    }

    #[test]
    fn test_wall_clock_display() {
        let ts = Timestamp::from_wall_clock(datetime!(2025-03-14 09:26:53.589 UTC));
        assert_eq!(ts.to_string(), "2025-03-14 09:26:53");
    }

    #[test]
    fn test_wall_clock_keeps_local_time() {
        let ts = Timestamp::from_wall_clock(datetime!(2025-03-14 09:26:53 -3));
        assert_eq!(ts.to_string(), "2025-03-14 09:26:53");
        assert_eq!(ts.to_string().parse::<Timestamp>().unwrap(), ts);
    }

    #[test]
    fn test_parse_wall_clock() {
        let ts: Timestamp = "2025-03-14 09:26:53".parse().unwrap();
        assert_eq!(ts, Timestamp::WallClock(datetime!(2025-03-14 09:26:53)));
    }

    #[test]
    fn test_parse_uptime() {
        let ts: Timestamp = "3600".parse().unwrap();
        assert_eq!(ts, Timestamp::Uptime(3600));
    }

    #[test]
    fn test_parse_garbage_timestamp() {
        let err = "yesterday".parse::<Timestamp>().unwrap_err();
        assert_eq!(err, ParseError::InvalidTimestamp("yesterday".to_string()));
    }

    #[test]
    fn test_reading_from_sample() {
        let reading = Reading::from_sample(7, sample());
        assert_eq!(reading.sequence_id, 7);
        assert_eq!(reading.sample(), sample());
    }

    #[test]
    fn test_log_entry_record_keeps_reading() {
        let reading = Reading::from_sample(3, sample());
        let mut entry = LogEntry::pending(reading);
        assert_eq!(entry.delivery_status, DeliveryStatus::Pending);

        entry.record(DeliveryResult::PermanentFailure);
        assert_eq!(entry.delivery_status, DeliveryStatus::Failed);
        assert_eq!(entry.reading, reading);

        entry.record(DeliveryResult::TransientFailure);
        assert_eq!(entry.delivery_status, DeliveryStatus::Pending);

        entry.record(DeliveryResult::Delivered);
        assert_eq!(entry.delivery_status, DeliveryStatus::Delivered);
    }

    #[test]
    fn test_delivery_result_retryable() {
        assert!(DeliveryResult::TransientFailure.is_retryable());
        assert!(!DeliveryResult::PermanentFailure.is_retryable());
        assert!(!DeliveryResult::Delivered.is_retryable());
    }

    #[test]
    fn test_delivery_status_parse() {
        assert_eq!("Delivered".parse::<DeliveryStatus>(), Ok(DeliveryStatus::Delivered));
        assert!("lost".parse::<DeliveryStatus>().is_err());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_timestamp_serializes_as_string() {
        let json = serde_json::to_string(&Timestamp::Uptime(90)).unwrap();
        assert_eq!(json, "\"90\"");

        let back: Timestamp = serde_json::from_str("\"2024-06-01 00:00:00\"").unwrap();
        assert!(back.is_wall_clock());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_delivery_status_serde() {
        let json = serde_json::to_string(&DeliveryStatus::Delivered).unwrap();
        assert_eq!(json, "\"delivered\"");
    }
}
