//! A simulated compost pile, for running the service without hardware.
//!
//! Each channel follows a bounded random walk. Temperature drifts toward a
//! thermophilic target, as an active pile does over its first days.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::traits::SensorBackend;

/// Temperature the simulated pile settles toward.
const TARGET_TEMPERATURE_C: f32 = 58.0;

#[derive(Debug)]
struct PileState {
    rng: StdRng,
    temperature_c: f32,
    humidity_raw: f32,
    gas_raw: f32,
}

/// Sensor backend producing plausible synthetic values.
#[derive(Debug)]
pub struct SimulatedSensor {
    state: Mutex<PileState>,
    adc_max: u16,
}

impl SimulatedSensor {
    /// A simulator seeded from the OS.
    pub fn new(adc_max: u16) -> Self {
        Self::with_rng(StdRng::from_os_rng(), adc_max)
    }

    /// A deterministic simulator.
    pub fn seeded(seed: u64, adc_max: u16) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), adc_max)
    }

    fn with_rng(rng: StdRng, adc_max: u16) -> Self {
        Self {
            state: Mutex::new(PileState {
                rng,
                temperature_c: 22.0,
                humidity_raw: f32::from(adc_max) * 0.55,
                gas_raw: f32::from(adc_max) * 0.08,
            }),
            adc_max,
        }
    }

    fn walk(rng: &mut StdRng, value: f32, step: f32, max: f32) -> f32 {
        (value + rng.random_range(-step..=step)).clamp(0.0, max)
    }
}

#[async_trait]
impl SensorBackend for SimulatedSensor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn read_temperature(&self) -> Result<f32> {
        let mut state = self.state.lock().await;
        let pull = (TARGET_TEMPERATURE_C - state.temperature_c) * 0.05;
        let noise = state.rng.random_range(-0.3..=0.3);
        state.temperature_c += pull + noise;
        Ok(state.temperature_c)
    }

    async fn read_humidity_raw(&self) -> Result<u16> {
        let mut state = self.state.lock().await;
        let max = f32::from(self.adc_max);
        let current = state.humidity_raw;
        state.humidity_raw = Self::walk(&mut state.rng, current, 25.0, max);
        Ok(state.humidity_raw as u16)
    }

    async fn read_gas_raw(&self) -> Result<u16> {
        let mut state = self.state.lock().await;
        let max = f32::from(self.adc_max);
        let current = state.gas_raw;
        state.gas_raw = Self::walk(&mut state.rng, current, 15.0, max);
        Ok(state.gas_raw as u16)
    }
}
