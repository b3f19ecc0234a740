//! Calibrated, timestamped sampling of the three channels.

use compost_types::Sample;
use tracing::{debug, warn};

use crate::calibration::{Calibration, DISCONNECTED_C};
use crate::clock::{Clock, SystemClock};
use crate::traits::{Channel, SensorBackend};

/// Last value successfully read from each channel.
#[derive(Debug, Clone, Copy, Default)]
struct LastGood {
    temperature_c: Option<f32>,
    humidity_pct: Option<f32>,
    methane_ppm: Option<f32>,
}

/// Produces calibrated [`Sample`]s from a [`SensorBackend`].
///
/// `sample()` never fails. A channel that cannot be read contributes its last
/// good value (or a neutral default before the first good read: the
/// disconnected-probe sentinel for temperature, zero for the ADC channels) and
/// the failure is logged.
pub struct SampleSource<B, C = SystemClock> {
    backend: B,
    clock: C,
    calibration: Calibration,
    last_good: LastGood,
}

impl<B: SensorBackend> SampleSource<B, SystemClock> {
    /// Create a source stamping samples with the host clock.
    pub fn new(backend: B, calibration: Calibration) -> Self {
        Self::with_clock(backend, SystemClock::new(), calibration)
    }
}

impl<B: SensorBackend, C: Clock> SampleSource<B, C> {
    /// Create a source with an explicit clock.
    pub fn with_clock(backend: B, clock: C, calibration: Calibration) -> Self {
        Self {
            backend,
            clock,
            calibration,
            last_good: LastGood::default(),
        }
    }

    /// The calibration in use.
    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    /// The underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Read all three channels and return one calibrated sample.
    ///
    /// The temperature conversion is bounded by the backend's conversion
    /// timeout; the ADC reads are effectively instant.
    pub async fn sample(&mut self) -> Sample {
        let temperature_c = self.sample_temperature().await;
        let humidity_pct = self.sample_humidity().await;
        let methane_ppm = self.sample_gas().await;

        let sample = Sample {
            timestamp: self.clock.timestamp(),
            temperature_c,
            humidity_pct,
            methane_ppm,
        };
        debug!(
            "Sampled {} via {}: T={:.2}C H={:.1}% CH4={:.0}ppm",
            sample.timestamp,
            self.backend.name(),
            sample.temperature_c,
            sample.humidity_pct,
            sample.methane_ppm
        );
        sample
    }

    async fn sample_temperature(&mut self) -> f32 {
        match self.backend.read_temperature().await {
            Ok(celsius) if celsius == DISCONNECTED_C || !celsius.is_finite() => {
                warn!("Temperature probe disconnected (reported {})", celsius);
                self.last_good.temperature_c.unwrap_or(DISCONNECTED_C)
            }
            Ok(celsius) => {
                let clamped = self.calibration.clamp_temperature(celsius);
                if clamped != celsius {
                    warn!(
                        "Temperature {} outside probe range, clamped to {}",
                        celsius, clamped
                    );
                }
                self.last_good.temperature_c = Some(clamped);
                clamped
            }
            Err(e) => {
                warn!("{}", e);
                self.last_good.temperature_c.unwrap_or(DISCONNECTED_C)
            }
        }
    }

    async fn sample_humidity(&mut self) -> f32 {
        match self.backend.read_humidity_raw().await {
            Ok(raw) => {
                self.note_out_of_range(Channel::Humidity, raw);
                let pct = self.calibration.humidity_percent(raw);
                self.last_good.humidity_pct = Some(pct);
                pct
            }
            Err(e) => {
                warn!("{}", e);
                self.last_good.humidity_pct.unwrap_or(0.0)
            }
        }
    }

    async fn sample_gas(&mut self) -> f32 {
        match self.backend.read_gas_raw().await {
            Ok(raw) => {
                self.note_out_of_range(Channel::Gas, raw);
                let ppm = self.calibration.gas_ppm(raw);
                self.last_good.methane_ppm = Some(ppm);
                ppm
            }
            Err(e) => {
                warn!("{}", e);
                self.last_good.methane_ppm.unwrap_or(0.0)
            }
        }
    }

    fn note_out_of_range(&self, channel: Channel, raw: u16) {
        if self.calibration.is_out_of_range(raw) {
            warn!(
                "Raw {} count {} exceeds ADC maximum {}, clamping",
                channel, raw, self.calibration.adc_max
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::mock::MockSensor;
    use compost_types::Timestamp;
    use std::time::Duration;

    fn source(mock: MockSensor) -> SampleSource<MockSensor, ManualClock> {
        let clock = ManualClock::new();
        clock.advance(Duration::from_secs(10));
        SampleSource::with_clock(mock, clock, Calibration::default())
    }

    #[tokio::test]
    async fn test_sample_applies_calibration() {
        let mock = MockSensor::new();
        mock.set_temperature(58.5);
        mock.set_humidity_raw(0);
        mock.set_gas_raw(4095);

        let sample = source(mock).sample().await;
        assert_eq!(sample.temperature_c, 58.5);
        assert_eq!(sample.humidity_pct, 100.0);
        assert_eq!(sample.methane_ppm, 1000.0);
        assert_eq!(sample.timestamp, Timestamp::Uptime(10));
    }

    #[tokio::test]
    async fn test_humidity_at_dry_bound_is_zero() {
        let mock = MockSensor::new();
        mock.set_humidity_raw(Calibration::default().humidity_dry_raw);
        let sample = source(mock).sample().await;
        assert_eq!(sample.humidity_pct, 0.0);
    }

    #[tokio::test]
    async fn test_failed_channel_reuses_last_good_value() {
        let mock = MockSensor::new();
        mock.set_temperature(45.0);
        let mut source = source(mock);

        let first = source.sample().await;
        assert_eq!(first.temperature_c, 45.0);

        source.backend().fail_channel(Channel::Temperature, true);
        source.backend().set_temperature(70.0);
        let second = source.sample().await;
        assert_eq!(second.temperature_c, 45.0);
    }

    #[tokio::test]
    async fn test_disconnected_probe_before_first_read() {
        let mock = MockSensor::new();
        mock.set_temperature(DISCONNECTED_C);
        let sample = source(mock).sample().await;
        assert_eq!(sample.temperature_c, DISCONNECTED_C);
    }

    #[tokio::test]
    async fn test_out_of_range_temperature_is_clamped() {
        let mock = MockSensor::new();
        mock.set_temperature(180.0);
        let sample = source(mock).sample().await;
        assert_eq!(sample.temperature_c, 125.0);
    }

    #[tokio::test]
    async fn test_failed_adc_before_first_read_defaults_to_zero() {
        let mock = MockSensor::new();
        mock.fail_channel(Channel::Gas, true);
        let sample = source(mock).sample().await;
        assert_eq!(sample.methane_ppm, 0.0);
    }
}
