//! Mock sensor implementation for testing.
//!
//! The [`MockSensor`] implements [`SensorBackend`] with scripted raw values
//! and per-channel failure injection, so sampling and scheduling logic can be
//! exercised without hardware.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::traits::{Channel, SensorBackend};

/// A scripted sensor.
///
/// # Example
///
/// ```
/// use compost_core::{MockSensor, SensorBackend};
///
/// #[tokio::main]
/// async fn main() {
///     let sensor = MockSensor::new();
///     sensor.set_humidity_raw(2000);
///     assert_eq!(sensor.read_humidity_raw().await.unwrap(), 2000);
/// }
/// ```
#[derive(Debug)]
pub struct MockSensor {
    temperature_bits: AtomicU32,
    humidity_raw: AtomicU16,
    gas_raw: AtomicU16,
    fail_temperature: AtomicBool,
    fail_humidity: AtomicBool,
    fail_gas: AtomicBool,
    /// Simulated conversion latency in milliseconds (0 = no delay).
    conversion_latency_ms: AtomicU64,
    read_count: AtomicU32,
}

impl Default for MockSensor {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensor {
    /// A sensor reporting 20 °C and mid-scale ADC counts.
    pub fn new() -> Self {
        Self {
            temperature_bits: AtomicU32::new(20.0f32.to_bits()),
            humidity_raw: AtomicU16::new(2048),
            gas_raw: AtomicU16::new(410),
            fail_temperature: AtomicBool::new(false),
            fail_humidity: AtomicBool::new(false),
            fail_gas: AtomicBool::new(false),
            conversion_latency_ms: AtomicU64::new(0),
            read_count: AtomicU32::new(0),
        }
    }

    /// Set the temperature the probe reports.
    pub fn set_temperature(&self, celsius: f32) {
        self.temperature_bits
            .store(celsius.to_bits(), Ordering::Relaxed);
    }

    /// Set the raw humidity count.
    pub fn set_humidity_raw(&self, raw: u16) {
        self.humidity_raw.store(raw, Ordering::Relaxed);
    }

    /// Set the raw gas count.
    pub fn set_gas_raw(&self, raw: u16) {
        self.gas_raw.store(raw, Ordering::Relaxed);
    }

    /// Make a channel fail (or recover).
    pub fn fail_channel(&self, channel: Channel, fail: bool) {
        let flag = match channel {
            Channel::Temperature => &self.fail_temperature,
            Channel::Humidity => &self.fail_humidity,
            Channel::Gas => &self.fail_gas,
        };
        flag.store(fail, Ordering::Relaxed);
    }

    /// Add an artificial temperature conversion delay.
    pub fn set_conversion_latency(&self, latency: Duration) {
        self.conversion_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
    }

    /// Number of full temperature reads served so far.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    fn check(&self, channel: Channel, flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::Relaxed) {
            Err(Error::read(channel, "mock failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SensorBackend for MockSensor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn read_temperature(&self) -> Result<f32> {
        let latency = self.conversion_latency_ms.load(Ordering::Relaxed);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.check(Channel::Temperature, &self.fail_temperature)?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(f32::from_bits(self.temperature_bits.load(Ordering::Relaxed)))
    }

    async fn read_humidity_raw(&self) -> Result<u16> {
        self.check(Channel::Humidity, &self.fail_humidity)?;
        Ok(self.humidity_raw.load(Ordering::Relaxed))
    }

    async fn read_gas_raw(&self) -> Result<u16> {
        self.check(Channel::Gas, &self.fail_gas)?;
        Ok(self.gas_raw.load(Ordering::Relaxed))
    }
}
