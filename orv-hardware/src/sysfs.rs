//! BeagleBone sysfs pin driver
//!
//! Drives the kernel's sysfs interfaces:
//!
//! - PWM: `/dev/bone/pwm/{chip}/{channel}/{period,duty_cycle,enable}`
//! - ADC: `/sys/bus/iio/devices/iio:device0/in_voltage{index}_raw`
//! - GPIO: `/sys/class/gpio/{export,gpioN/direction,gpioN/value}`
//!
//! Pins are muxed with the `config-pin` utility the first time they are used.

use crate::driver::PinDriver;
use async_trait::async_trait;
use orv_core::{AdcChannel, GpioLine, OrvError, PwmChannel, Result};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PwmState {
    period_ns: u32,
    duty_ns: u32,
}

/// Sysfs driver for the BeagleBone Black
#[derive(Debug)]
pub struct SysfsDriver {
    root: PathBuf,
    run_config_pin: bool,
    /// Header pins already muxed, with their mode
    muxed: HashMap<&'static str, &'static str>,
    pwm: HashMap<PwmChannel, PwmState>,
    gpio_ready: HashSet<u32>,
}

impl SysfsDriver {
    /// Driver rooted at `/` that muxes pins with `config-pin`.
    pub fn new() -> Self {
        Self {
            root: PathBuf::from("/"),
            run_config_pin: true,
            muxed: HashMap::new(),
            pwm: HashMap::new(),
            gpio_ready: HashSet::new(),
        }
    }

    /// Driver rooted at another directory, without pin muxing.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            run_config_pin: false,
            ..Self::new()
        }
    }

    fn pwm_dir(&self, channel: &PwmChannel) -> PathBuf {
        self.root
            .join("dev/bone/pwm")
            .join(channel.chip.to_string())
            .join(channel.channel.to_string())
    }

    fn adc_path(&self, channel: &AdcChannel) -> PathBuf {
        self.root.join(format!(
            "sys/bus/iio/devices/iio:device0/in_voltage{}_raw",
            channel.index
        ))
    }

    fn gpio_dir(&self) -> PathBuf {
        self.root.join("sys/class/gpio")
    }

    async fn mux(&mut self, header_pin: &'static str, mode: &'static str) -> Result<()> {
        if !self.run_config_pin || self.muxed.get(header_pin) == Some(&mode) {
            return Ok(());
        }

        debug!("config-pin {} {}", header_pin, mode);
        let output = Command::new("config-pin")
            .arg(header_pin)
            .arg(mode)
            .output()
            .await
            .map_err(|e| OrvError::WriteFailure {
                target: header_pin.to_string(),
                reason: format!("config-pin failed to run: {}", e),
            })?;

        if !output.status.success() {
            return Err(OrvError::WriteFailure {
                target: header_pin.to_string(),
                reason: format!(
                    "config-pin {} exited with {}: {}",
                    mode,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        self.muxed.insert(header_pin, mode);
        Ok(())
    }
}

impl Default for SysfsDriver {
    fn default() -> Self {
        Self::new()
    }
}

async fn echo_value(path: &Path, value: &str) -> Result<()> {
    debug!("echo {} > {}", value, path.display());
    tokio::fs::write(path, value)
        .await
        .map_err(|e| OrvError::WriteFailure {
            target: path.display().to_string(),
            reason: e.to_string(),
        })
}

#[async_trait]
impl PinDriver for SysfsDriver {
    async fn read_adc(&mut self, channel: &AdcChannel) -> Result<u16> {
        let path = self.adc_path(channel);
        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| OrvError::ReadFailure {
                target: channel.header_pin.to_string(),
                reason: format!("{}: {}", path.display(), e),
            })?;

        raw.trim().parse::<u16>().map_err(|e| OrvError::ReadFailure {
            target: channel.header_pin.to_string(),
            reason: format!("unexpected ADC value {:?}: {}", raw.trim(), e),
        })
    }

    async fn write_pwm(
        &mut self,
        channel: &PwmChannel,
        period_ns: u32,
        duty_ns: u32,
    ) -> Result<()> {
        let duty_ns = duty_ns.min(period_ns);
        let wanted = PwmState { period_ns, duty_ns };
        let current = self.pwm.get(channel).copied();

        if current == Some(wanted) {
            return Ok(());
        }

        self.mux(channel.header_pin, "pwm").await?;
        let dir = self.pwm_dir(channel);

        if current.map(|state| state.period_ns) != Some(period_ns) {
            // The kernel rejects a period shorter than the standing duty cycle
            echo_value(&dir.join("duty_cycle"), "0").await?;
            echo_value(&dir.join("period"), &period_ns.to_string()).await?;
            echo_value(&dir.join("duty_cycle"), &duty_ns.to_string()).await?;
            echo_value(&dir.join("enable"), "1").await?;
        } else {
            echo_value(&dir.join("duty_cycle"), &duty_ns.to_string()).await?;
        }

        self.pwm.insert(*channel, wanted);
        Ok(())
    }

    async fn write_gpio(&mut self, line: &GpioLine, high: bool) -> Result<()> {
        let number = line.number();
        let gpio = self.gpio_dir().join(format!("gpio{}", number));

        if !self.gpio_ready.contains(&number) {
            self.mux(line.header_pin, "gpio").await?;
            if !tokio::fs::try_exists(&gpio).await.unwrap_or(false) {
                echo_value(&self.gpio_dir().join("export"), &number.to_string()).await?;
            }
            echo_value(&gpio.join("direction"), "out").await?;
            self.gpio_ready.insert(number);
        }

        echo_value(&gpio.join("value"), if high { "1" } else { "0" }).await
    }

    fn name(&self) -> &'static str {
        "sysfs"
    }
}
