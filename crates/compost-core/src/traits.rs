//! Trait abstractions for sensor hardware.
//!
//! This module provides the [`SensorBackend`] trait that abstracts over real
//! probes, the simulator and mock sensors for testing.

use core::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One of the three measured channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// One-wire temperature probe.
    Temperature,
    /// Capacitive substrate humidity probe (ADC).
    Humidity,
    /// Methane sensor (ADC).
    Gas,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Temperature => write!(f, "temperature"),
            Channel::Humidity => write!(f, "humidity"),
            Channel::Gas => write!(f, "gas"),
        }
    }
}

/// Raw access to the three sensor channels.
///
/// Implementations return uncalibrated values; [`crate::SampleSource`] applies
/// the calibration and handles failures.
///
/// # Example
///
/// ```ignore
/// use compost_core::{SensorBackend, Result};
///
/// async fn print_raw<B: SensorBackend>(backend: &B) -> Result<()> {
///     let raw = backend.read_humidity_raw().await?;
///     println!("humidity ADC: {raw}");
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait SensorBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Trigger a temperature conversion and return degrees Celsius.
    ///
    /// This blocks for the probe's conversion time (up to ~750 ms for a
    /// 12-bit DS18B20).
    async fn read_temperature(&self) -> Result<f32>;

    /// Read the humidity channel as a raw ADC count.
    async fn read_humidity_raw(&self) -> Result<u16>;

    /// Read the gas channel as a raw ADC count.
    async fn read_gas_raw(&self) -> Result<u16>;
}

#[async_trait]
impl<T: SensorBackend + ?Sized> SensorBackend for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn read_temperature(&self) -> Result<f32> {
        (**self).read_temperature().await
    }

    async fn read_humidity_raw(&self) -> Result<u16> {
        (**self).read_humidity_raw().await
    }

    async fn read_gas_raw(&self) -> Result<u16> {
        (**self).read_gas_raw().await
    }
}
