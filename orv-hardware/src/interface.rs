//! Hardware interface
//!
//! Binds a validated [`WireMapping`] to a board's pin table and a [`PinDriver`],
//! exposing zone-level operations: read a zone's temperature, set a zone's fan duty,
//! drive the onboard LEDs and release the hardware on shutdown.
//!
//! All I/O is serialized behind one async mutex. Callers that need a read and a
//! write to happen back to back hold a [`ZoneIo`] guard.

use crate::driver::PinDriver;
use crate::thermistor::ThermistorModel;
use orv_core::{
    AdcChannel, BoardInfo, FanPort, GpioLine, OnboardLed, OrvError, PinTableEntry, PwmChannel,
    Result, ThermistorPort, WireMapping, Zone,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Runtime settings for the hardware interface
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HardwareSettings {
    /// Upper bound on any single pin read or write
    pub io_timeout: Duration,
    /// PWM period; the board's default when `None`
    pub pwm_period_ns: Option<u32>,
}

impl Default for HardwareSettings {
    fn default() -> Self {
        Self {
            io_timeout: Duration::from_millis(500),
            pwm_period_ns: None,
        }
    }
}

#[derive(Debug, Default)]
struct ZonePins {
    fans: Vec<(FanPort, PwmChannel)>,
    thermistors: Vec<(ThermistorPort, AdcChannel)>,
}

static NO_PINS: ZonePins = ZonePins {
    fans: Vec::new(),
    thermistors: Vec::new(),
};

/// Zone-level access to the rack's fans, thermistors and LEDs
pub struct HardwareInterface {
    driver: Mutex<Box<dyn PinDriver>>,
    zones: BTreeMap<Zone, ZonePins>,
    leds: Vec<(OnboardLed, GpioLine)>,
    mapping: WireMapping,
    board: BoardInfo,
    model: ThermistorModel,
    pwm_period_ns: u32,
    io_timeout: Duration,
}

impl HardwareInterface {
    /// Resolve every mapped port to its physical pin.
    ///
    /// # Errors
    ///
    /// Returns `UnresolvedPort` if the mapping names a port the pin table lacks.
    pub fn new(
        mapping: WireMapping,
        pins: &PinTableEntry,
        driver: Box<dyn PinDriver>,
        settings: HardwareSettings,
    ) -> Result<Self> {
        let mut zones = BTreeMap::new();

        for zone in Zone::ALL {
            let fans = mapping
                .fans(zone)
                .iter()
                .map(|port| {
                    pins.fan(*port)
                        .map(|channel| (*port, *channel))
                        .ok_or_else(|| OrvError::UnresolvedPort(port.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;
            let thermistors = mapping
                .thermistors(zone)
                .iter()
                .map(|port| {
                    pins.thermistor(*port)
                        .map(|channel| (*port, *channel))
                        .ok_or_else(|| OrvError::UnresolvedPort(port.to_string()))
                })
                .collect::<Result<Vec<_>>>()?;

            debug!(
                "{}: fans {:?}, thermistors {:?}",
                zone,
                fans.iter().map(|(port, ch)| (port.as_str(), ch.header_pin)).collect::<Vec<_>>(),
                thermistors
                    .iter()
                    .map(|(port, ch)| (port.as_str(), ch.header_pin))
                    .collect::<Vec<_>>()
            );
            zones.insert(zone, ZonePins { fans, thermistors });
        }

        let leds = OnboardLed::ALL
            .into_iter()
            .filter_map(|led| pins.led(led).map(|line| (led, *line)))
            .collect();

        info!(
            "Hardware interface ready on {} ({} driver)",
            pins.name,
            driver.name()
        );

        Ok(Self {
            driver: Mutex::new(driver),
            zones,
            leds,
            mapping,
            board: pins.to_board_info(),
            model: ThermistorModel::new(pins.adc_max_counts),
            pwm_period_ns: settings.pwm_period_ns.unwrap_or(pins.pwm_period_ns),
            io_timeout: settings.io_timeout,
        })
    }

    pub fn mapping(&self) -> &WireMapping {
        &self.mapping
    }

    pub fn board_info(&self) -> &BoardInfo {
        &self.board
    }

    pub fn fan_count(&self, zone: Zone) -> usize {
        self.pins(zone).fans.len()
    }

    pub fn thermistor_count(&self, zone: Zone) -> usize {
        self.pins(zone).thermistors.len()
    }

    fn pins(&self, zone: Zone) -> &ZonePins {
        self.zones.get(&zone).unwrap_or(&NO_PINS)
    }

    /// Lock the driver for a sequence of operations on one zone.
    pub async fn zone(&self, zone: Zone) -> ZoneIo<'_> {
        ZoneIo {
            hardware: self,
            zone,
            pins: self.pins(zone),
            driver: self.driver.lock().await,
        }
    }

    /// Mean temperature of a zone's thermistors in Celsius.
    pub async fn read_temperature(&self, zone: Zone) -> Result<f64> {
        self.zone(zone).await.read_temperature().await
    }

    /// Set every fan of a zone to the same duty. Returns the duty actually applied.
    pub async fn set_fan_duty(&self, zone: Zone, duty: f64) -> Result<f64> {
        self.zone(zone).await.set_fan_duty(duty).await
    }

    pub async fn set_onboard_led(&self, led: OnboardLed, on: bool) -> Result<()> {
        let Some((_, line)) = self.leds.iter().find(|(l, _)| *l == led) else {
            debug!("{} LED not present on {}", led, self.board.name);
            return Ok(());
        };

        let mut driver = self.driver.lock().await;
        timeout(self.io_timeout, driver.write_gpio(line, on))
            .await
            .map_err(|_| OrvError::WriteFailure {
                target: format!("{} LED", led),
                reason: "timed out".to_string(),
            })?
    }

    /// Drive every mapped fan to `safe_duty` and switch the RUN and WEB LEDs off.
    ///
    /// Every output is attempted; the first error is returned.
    pub async fn release(&self, safe_duty: f64) -> Result<()> {
        info!("Releasing hardware, fans to {:.0}%", safe_duty * 100.0);
        let mut first_error = None;

        for zone in Zone::ALL {
            if let Err(e) = self.set_fan_duty(zone, safe_duty).await {
                warn!("Failed to release {}: {}", zone, e);
                first_error.get_or_insert(e);
            }
        }
        for led in [OnboardLed::Run, OnboardLed::Web] {
            if let Err(e) = self.set_onboard_led(led, false).await {
                warn!("Failed to switch off {} LED: {}", led, e);
                first_error.get_or_insert(e);
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// Exclusive access to the pins, scoped to one zone
pub struct ZoneIo<'a> {
    hardware: &'a HardwareInterface,
    zone: Zone,
    pins: &'a ZonePins,
    driver: MutexGuard<'a, Box<dyn PinDriver>>,
}

impl ZoneIo<'_> {
    pub fn zone(&self) -> Zone {
        self.zone
    }

    /// Mean temperature of the zone's thermistors in Celsius.
    ///
    /// # Errors
    ///
    /// - `NoSensor` if the zone has no thermistors
    /// - `ReadTimeout` if a read exceeds the I/O timeout
    /// - `ReadFailure` if a read fails or a probe sits at an ADC rail
    pub async fn read_temperature(&mut self) -> Result<f64> {
        let thermistors = &self.pins.thermistors;
        if thermistors.is_empty() {
            return Err(OrvError::NoSensor(self.zone));
        }

        let mut total = 0.0;
        for (port, channel) in thermistors {
            let counts = timeout(self.hardware.io_timeout, self.driver.read_adc(channel))
                .await
                .map_err(|_| OrvError::ReadTimeout(format!("{} ({})", port, channel.header_pin)))??;

            let celsius = self
                .hardware
                .model
                .counts_to_celsius(counts)
                .ok_or_else(|| OrvError::ReadFailure {
                    target: port.to_string(),
                    reason: format!("{} counts, probe open or shorted", counts),
                })?;

            debug!("{} {}: {} counts, {:.2}°C", self.zone, port, counts, celsius);
            total += celsius;
        }

        Ok(total / thermistors.len() as f64)
    }

    /// Write the same duty to every fan of the zone.
    ///
    /// The duty is clamped to `[0, 1]`; NaN becomes full duty. A zone without fans
    /// succeeds without writing. Every fan is attempted; the first error is
    /// returned.
    pub async fn set_fan_duty(&mut self, duty: f64) -> Result<f64> {
        let duty = if duty.is_nan() { 1.0 } else { duty.clamp(0.0, 1.0) };
        let period_ns = self.hardware.pwm_period_ns;
        let duty_ns = (f64::from(period_ns) * duty).round() as u32;
        let mut first_error = None;

        for (port, channel) in &self.pins.fans {
            let result = timeout(
                self.hardware.io_timeout,
                self.driver.write_pwm(channel, period_ns, duty_ns),
            )
            .await
            .unwrap_or_else(|_| {
                Err(OrvError::WriteFailure {
                    target: port.to_string(),
                    reason: "timed out".to_string(),
                })
            });

            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(duty),
        }
    }
}
