//! Platform-agnostic types for compost monitor telemetry.
//!
//! This crate provides the data model shared by the sensor layer
//! (compost-core), the durable log (compost-store) and the service.
//!
//! # Features
//!
//! - [`Sample`]: a calibrated measurement as produced by a sample source
//! - [`Reading`]: a sample stamped with its sequence id by the durable log
//! - [`LogEntry`], [`DeliveryStatus`], [`DeliveryResult`] for remote sync
//! - [`Timestamp`]: wall clock with an uptime fallback
//!
//! # Example
//!
//! ```
//! use compost_types::{LogEntry, Reading, Sample, Timestamp, DeliveryResult, DeliveryStatus};
//!
//! let sample = Sample {
//!     timestamp: Timestamp::Uptime(30),
//!     temperature_c: 48.2,
//!     humidity_pct: 61.0,
//!     methane_ppm: 140.0,
//! };
//! let mut entry = LogEntry::pending(Reading::from_sample(1, sample));
//! entry.record(DeliveryResult::Delivered);
//! assert_eq!(entry.delivery_status, DeliveryStatus::Delivered);
//! ```

pub mod error;
pub mod types;

pub use error::{ParseError, ParseResult};
pub use types::{DeliveryResult, DeliveryStatus, LogEntry, Reading, Sample, Timestamp};
