//! Linux sysfs backend.
//!
//! Reads a DS18B20 through the kernel `w1-therm` driver and the two analog
//! channels through IIO ADC attributes:
//!
//! - temperature: `/sys/bus/w1/devices/28-*/w1_slave`
//! - humidity / gas: `/sys/bus/iio/devices/iio:device0/in_voltageN_raw`
//!
//! Reading `w1_slave` starts a conversion and blocks until it completes, so
//! the read is bounded by a timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::traits::{Channel, SensorBackend};

/// DS18B20 power-on reset value; reported when no conversion has run.
const POWER_ON_RESET_MILLI_C: i32 = 85_000;

/// Paths and bounds for a [`SysfsSensor`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysfsPaths {
    /// `w1_slave` attribute of the temperature probe.
    pub temperature: PathBuf,
    /// Raw ADC attribute of the humidity probe.
    pub humidity: PathBuf,
    /// Raw ADC attribute of the gas sensor.
    pub gas: PathBuf,
}

impl Default for SysfsPaths {
    fn default() -> Self {
        Self {
            temperature: PathBuf::from("/sys/bus/w1/devices/28-000000000000/w1_slave"),
            humidity: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage0_raw"),
            gas: PathBuf::from("/sys/bus/iio/devices/iio:device0/in_voltage1_raw"),
        }
    }
}

/// Sensor backend reading sysfs attributes.
#[derive(Debug, Clone)]
pub struct SysfsSensor {
    paths: SysfsPaths,
    conversion_timeout: Duration,
}

impl SysfsSensor {
    /// Worst-case 12-bit DS18B20 conversion time plus bus overhead.
    pub const DEFAULT_CONVERSION_TIMEOUT: Duration = Duration::from_millis(1000);

    /// Create a backend for the given attribute paths.
    pub fn new(paths: SysfsPaths) -> Self {
        Self {
            paths,
            conversion_timeout: Self::DEFAULT_CONVERSION_TIMEOUT,
        }
    }

    /// Override the temperature conversion bound.
    pub fn with_conversion_timeout(mut self, timeout: Duration) -> Self {
        self.conversion_timeout = timeout;
        self
    }

    async fn read_attribute(path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|source| Error::Io {
                path: path.to_path_buf(),
                source,
            })
    }

    async fn read_adc(&self, channel: Channel, path: &Path) -> Result<u16> {
        let content = Self::read_attribute(path).await?;
        parse_adc_raw(&content).ok_or_else(|| {
            Error::read(channel, format!("unparseable ADC value {:?}", content.trim()))
        })
    }
}

#[async_trait]
impl SensorBackend for SysfsSensor {
    fn name(&self) -> &str {
        "sysfs"
    }

    async fn read_temperature(&self) -> Result<f32> {
        let content = tokio::time::timeout(
            self.conversion_timeout,
            Self::read_attribute(&self.paths.temperature),
        )
        .await
        .map_err(|_| Error::ConversionTimeout {
            channel: Channel::Temperature,
            timeout: self.conversion_timeout,
        })??;
        parse_w1_slave(&content)
    }

    async fn read_humidity_raw(&self) -> Result<u16> {
        self.read_adc(Channel::Humidity, &self.paths.humidity).await
    }

    async fn read_gas_raw(&self) -> Result<u16> {
        self.read_adc(Channel::Gas, &self.paths.gas).await
    }
}

/// Parse the two-line `w1_slave` output of the `w1-therm` driver.
///
/// ```text
/// 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
/// 72 01 4b 46 7f ff 0e 10 57 t=23125
/// ```
pub fn parse_w1_slave(content: &str) -> Result<f32> {
    let mut lines = content.lines();
    let crc_line = lines
        .next()
        .ok_or_else(|| Error::read(Channel::Temperature, "empty w1_slave output"))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(Error::read(Channel::Temperature, "CRC check failed"));
    }

    let data_line = lines
        .next()
        .ok_or_else(|| Error::read(Channel::Temperature, "missing temperature line"))?;
    let milli_c: i32 = data_line
        .rsplit_once("t=")
        .and_then(|(_, value)| value.trim().parse().ok())
        .ok_or_else(|| Error::read(Channel::Temperature, "missing t= field"))?;

    if milli_c == POWER_ON_RESET_MILLI_C {
        return Err(Error::read(
            Channel::Temperature,
            "probe returned power-on reset value",
        ));
    }

    Ok(milli_c as f32 / 1000.0)
}

/// Parse an IIO `in_voltageN_raw` attribute.
///
/// Values wider than 16 bits saturate; the calibration clamps them.
pub fn parse_adc_raw(content: &str) -> Option<u16> {
    let value: i64 = content.trim().parse().ok()?;
    Some(value.clamp(0, i64::from(u16::MAX)) as u16)
}
