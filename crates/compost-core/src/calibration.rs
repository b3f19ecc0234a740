//! Fixed transforms from raw channel values to engineering units.
//!
//! Out-of-range input is clamped, never rejected. The humidity probe is a
//! capacitive sensor whose ADC count *falls* as the substrate gets wetter, so
//! the wet bound is the lower raw value.

use serde::{Deserialize, Serialize};

/// Value reported by a DS18B20 driver when the probe does not answer.
pub const DISCONNECTED_C: f32 = -127.0;

/// Calibration constants for the three channels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Calibration {
    /// Largest count the ADC can report (12-bit converters report 4095).
    pub adc_max: u16,
    /// Raw humidity count at or below which the substrate reads 100 %.
    pub humidity_wet_raw: u16,
    /// Raw humidity count at or above which the substrate reads 0 %.
    pub humidity_dry_raw: u16,
    /// Methane concentration corresponding to a full-scale gas reading.
    pub gas_ppm_max: f32,
    /// Lowest temperature the probe can report.
    pub temperature_min_c: f32,
    /// Highest temperature the probe can report.
    pub temperature_max_c: f32,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            adc_max: 4095,
            humidity_wet_raw: 1400,
            humidity_dry_raw: 3300,
            gas_ppm_max: 1000.0,
            temperature_min_c: -55.0,
            temperature_max_c: 125.0,
        }
    }
}

impl Calibration {
    /// Map a raw humidity count onto 0-100 %.
    ///
    /// ```
    /// use compost_core::Calibration;
    ///
    /// let cal = Calibration::default();
    /// assert_eq!(cal.humidity_percent(0), 100.0);
    /// assert_eq!(cal.humidity_percent(4095), 0.0);
    /// ```
    #[must_use]
    pub fn humidity_percent(&self, raw: u16) -> f32 {
        if raw <= self.humidity_wet_raw {
            return 100.0;
        }
        if raw >= self.humidity_dry_raw {
            return 0.0;
        }
        let span = f32::from(self.humidity_dry_raw - self.humidity_wet_raw);
        let dryness = f32::from(raw - self.humidity_wet_raw);
        (100.0 * (1.0 - dryness / span)).clamp(0.0, 100.0)
    }

    /// Scale a raw gas count onto `0..=gas_ppm_max`.
    #[must_use]
    pub fn gas_ppm(&self, raw: u16) -> f32 {
        if self.adc_max == 0 {
            return 0.0;
        }
        let raw = raw.min(self.adc_max);
        f32::from(raw) / f32::from(self.adc_max) * self.gas_ppm_max
    }

    /// Clamp a probe temperature onto the probe's documented range.
    #[must_use]
    pub fn clamp_temperature(&self, celsius: f32) -> f32 {
        celsius.clamp(self.temperature_min_c, self.temperature_max_c)
    }

    /// Whether a raw count lies outside the ADC range.
    #[must_use]
    pub fn is_out_of_range(&self, raw: u16) -> bool {
        raw > self.adc_max
    }

    /// Check the constants for internal consistency.
    ///
    /// Returns a list of human-readable problems, empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.adc_max == 0 {
            problems.push("adc_max must be greater than 0".to_string());
        }
        if self.humidity_wet_raw >= self.humidity_dry_raw {
            problems.push(format!(
                "humidity_wet_raw ({}) must be below humidity_dry_raw ({})",
                self.humidity_wet_raw, self.humidity_dry_raw
            ));
        }
        if self.humidity_dry_raw > self.adc_max {
            problems.push(format!(
                "humidity_dry_raw ({}) exceeds adc_max ({})",
                self.humidity_dry_raw, self.adc_max
            ));
        }
        if !(self.gas_ppm_max.is_finite() && self.gas_ppm_max > 0.0) {
            problems.push("gas_ppm_max must be a positive number".to_string());
        }
        if self.temperature_min_c >= self.temperature_max_c {
            problems.push("temperature_min_c must be below temperature_max_c".to_string());
        }

        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_humidity_bounds_are_exact() {
        let cal = Calibration::default();
        assert_eq!(cal.humidity_percent(cal.humidity_wet_raw - 1), 100.0);
        assert_eq!(cal.humidity_percent(cal.humidity_wet_raw), 100.0);
        assert_eq!(cal.humidity_percent(cal.humidity_dry_raw), 0.0);
        assert_eq!(cal.humidity_percent(cal.humidity_dry_raw + 1), 0.0);
    }

    #[test]
    fn test_humidity_midpoint() {
        let cal = Calibration {
            humidity_wet_raw: 1000,
            humidity_dry_raw: 3000,
            ..Default::default()
        };
        assert!((cal.humidity_percent(2000) - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_gas_scaling() {
        let cal = Calibration::default();
        assert_eq!(cal.gas_ppm(0), 0.0);
        assert_eq!(cal.gas_ppm(4095), 1000.0);
        // Counts above full scale clamp to the maximum.
        assert_eq!(cal.gas_ppm(u16::MAX), 1000.0);
    }

    #[test]
    fn test_temperature_clamp() {
        let cal = Calibration::default();
        assert_eq!(cal.clamp_temperature(200.0), 125.0);
        assert_eq!(cal.clamp_temperature(-80.0), -55.0);
        assert_eq!(cal.clamp_temperature(61.25), 61.25);
    }

    #[test]
    fn test_default_validates() {
        assert!(Calibration::default().validate().is_empty());
    }

    #[test]
    fn test_inverted_humidity_bounds_rejected() {
        let cal = Calibration {
            humidity_wet_raw: 3000,
            humidity_dry_raw: 1000,
            ..Default::default()
        };
        let problems = cal.validate();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].contains("humidity_wet_raw"));
    }

    proptest! {
        #[test]
        fn humidity_stays_in_percent_range(raw in any::<u16>()) {
            let pct = Calibration::default().humidity_percent(raw);
            prop_assert!((0.0..=100.0).contains(&pct));
        }

        #[test]
        fn humidity_below_wet_bound_is_saturated(raw in 0u16..=1400) {
            prop_assert_eq!(Calibration::default().humidity_percent(raw), 100.0);
        }

        #[test]
        fn humidity_above_dry_bound_is_zero(raw in 3300u16..=u16::MAX) {
            prop_assert_eq!(Calibration::default().humidity_percent(raw), 0.0);
        }

        #[test]
        fn humidity_is_monotonic(a in any::<u16>(), b in any::<u16>()) {
            let cal = Calibration::default();
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(cal.humidity_percent(lo) >= cal.humidity_percent(hi));
        }

        #[test]
        fn gas_never_exceeds_full_scale(raw in any::<u16>()) {
            let ppm = Calibration::default().gas_ppm(raw);
            prop_assert!((0.0..=1000.0).contains(&ppm));
        }
    }
}
