//! Sensor sampling layer for the compost monitor.
//!
//! This crate turns raw probe values into calibrated, timestamped
//! [`Sample`](compost_types::Sample)s:
//!
//! - [`SensorBackend`]: raw access to the temperature probe and the two ADC
//!   channels (humidity, methane)
//! - [`Calibration`]: fixed, clamping transforms into engineering units
//! - [`Clock`]: wall-clock time with an uptime fallback
//! - [`SampleSource`]: combines the above; `sample()` never fails
//!
//! Backends:
//!
//! - [`SysfsSensor`]: Linux `w1-therm` and IIO attributes
//! - [`SimulatedSensor`]: synthetic pile for running without hardware
//! - [`MockSensor`]: scripted values and failure injection for tests
//!
//! # Example
//!
//! ```
//! use compost_core::{Calibration, MockSensor, SampleSource};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut source = SampleSource::new(MockSensor::new(), Calibration::default());
//!     let sample = source.sample().await;
//!     assert!((0.0..=100.0).contains(&sample.humidity_pct));
//! }
//! ```

pub mod calibration;
pub mod clock;
pub mod error;
pub mod mock;
pub mod simulated;
pub mod source;
pub mod sysfs;
pub mod traits;

pub use calibration::{Calibration, DISCONNECTED_C};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, Result};
pub use mock::MockSensor;
pub use simulated::SimulatedSensor;
pub use source::SampleSource;
pub use sysfs::{SysfsPaths, SysfsSensor};
pub use traits::{Channel, SensorBackend};

// Re-export the shared data model.
pub use compost_types;
