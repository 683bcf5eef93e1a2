//! In-memory pin driver
//!
//! Stands in for the board when running with `--mock` and in tests. Clones share
//! state, so a test can keep a clone to set temperatures, inject faults and inspect
//! what was written after handing the driver to a `HardwareInterface`.

use crate::driver::PinDriver;
use crate::thermistor::ThermistorModel;
use async_trait::async_trait;
use orv_core::{AdcChannel, GpioLine, OrvError, PwmChannel, Result};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Default)]
struct SimState {
    adc: HashMap<u8, u16>,
    failing_adc: HashSet<u8>,
    read_stall: Option<Duration>,
    fail_writes: bool,
    pwm: HashMap<(u8, char), (u32, u32)>,
    gpio: HashMap<u32, bool>,
    pwm_writes: usize,
}

/// Simulated driver with fault and stall injection
#[derive(Debug, Clone)]
pub struct SimulatedDriver {
    state: Arc<Mutex<SimState>>,
    model: ThermistorModel,
    idle_counts: u16,
}

impl SimulatedDriver {
    /// Every ADC channel starts out reading 25 °C.
    pub fn new(adc_max_counts: u16) -> Self {
        let model = ThermistorModel::new(adc_max_counts);
        Self {
            state: Arc::new(Mutex::new(SimState::default())),
            idle_counts: model.celsius_to_counts(25.0),
            model,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        // A panicking test thread must not wedge the others
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_adc_counts(&self, channel: &AdcChannel, counts: u16) {
        self.lock().adc.insert(channel.index, counts);
    }

    pub fn set_temperature(&self, channel: &AdcChannel, celsius: f64) {
        let counts = self.model.celsius_to_counts(celsius);
        self.set_adc_counts(channel, counts);
    }

    /// Make reads of a channel fail until cleared.
    pub fn fail_reads(&self, channel: &AdcChannel, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_adc.insert(channel.index);
        } else {
            state.failing_adc.remove(&channel.index);
        }
    }

    /// Delay every ADC read, or stop delaying with `None`.
    pub fn stall_reads(&self, stall: Option<Duration>) {
        self.lock().read_stall = stall;
    }

    pub fn fail_writes(&self, failing: bool) {
        self.lock().fail_writes = failing;
    }

    /// Last `(period_ns, duty_ns)` written to a channel
    pub fn pwm(&self, channel: &PwmChannel) -> Option<(u32, u32)> {
        self.lock().pwm.get(&(channel.chip, channel.channel)).copied()
    }

    /// Last duty written to a channel, as a fraction of the period
    pub fn duty(&self, channel: &PwmChannel) -> Option<f64> {
        self.pwm(channel)
            .filter(|(period, _)| *period > 0)
            .map(|(period, duty)| f64::from(duty) / f64::from(period))
    }

    pub fn gpio(&self, line: &GpioLine) -> Option<bool> {
        self.lock().gpio.get(&line.number()).copied()
    }

    /// Number of PWM writes that reached the simulated pins
    pub fn pwm_writes(&self) -> usize {
        self.lock().pwm_writes
    }
}

#[async_trait]
impl PinDriver for SimulatedDriver {
    async fn read_adc(&mut self, channel: &AdcChannel) -> Result<u16> {
        let (counts, failing, stall) = {
            let state = self.lock();
            (
                state.adc.get(&channel.index).copied().unwrap_or(self.idle_counts),
                state.failing_adc.contains(&channel.index),
                state.read_stall,
            )
        };

        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        if failing {
            return Err(OrvError::ReadFailure {
                target: channel.header_pin.to_string(),
                reason: "simulated read failure".to_string(),
            });
        }
        Ok(counts)
    }

    async fn write_pwm(
        &mut self,
        channel: &PwmChannel,
        period_ns: u32,
        duty_ns: u32,
    ) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(OrvError::WriteFailure {
                target: channel.header_pin.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }

        debug!(
            "sim pwm {}/{} period={} duty={}",
            channel.chip, channel.channel, period_ns, duty_ns
        );
        state
            .pwm
            .insert((channel.chip, channel.channel), (period_ns, duty_ns.min(period_ns)));
        state.pwm_writes += 1;
        Ok(())
    }

    async fn write_gpio(&mut self, line: &GpioLine, high: bool) -> Result<()> {
        let mut state = self.lock();
        if state.fail_writes {
            return Err(OrvError::WriteFailure {
                target: line.header_pin.to_string(),
                reason: "simulated write failure".to_string(),
            });
        }
        state.gpio.insert(line.number(), high);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
