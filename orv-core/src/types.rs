//! Core types and data structures for Open Rack Vent
//!
//! Every axis of the wiring configuration (zones, ports, LEDs, platforms) is a closed
//! enum. Parsing is case-insensitive against the board marking so that values typed by
//! hand (`pn1`, `intake_lower`) are accepted, while serialization always emits the
//! canonical marking (`PN1`, `INTAKE_LOWER`).

use crate::error::{OrvError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Logical airflow region of the rack, independent of physical wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Zone {
    IntakeLower,
    IntakeUpper,
    ExhaustLower,
    ExhaustUpper,
}

impl Zone {
    /// Every zone, in a stable order.
    pub const ALL: [Zone; 4] = [
        Zone::IntakeLower,
        Zone::IntakeUpper,
        Zone::ExhaustLower,
        Zone::ExhaustUpper,
    ];

    /// Canonical name as used in the wiring JSON.
    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::IntakeLower => "INTAKE_LOWER",
            Zone::IntakeUpper => "INTAKE_UPPER",
            Zone::ExhaustLower => "EXHAUST_LOWER",
            Zone::ExhaustUpper => "EXHAUST_UPPER",
        }
    }

    /// Lowercase name, used in MQTT topics and Home Assistant unique IDs.
    pub fn slug(&self) -> String {
        self.as_str().to_ascii_lowercase()
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Zone {
    type Err = OrvError;

    fn from_str(s: &str) -> Result<Self> {
        Zone::ALL
            .into_iter()
            .find(|zone| zone.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrvError::InvalidInput(format!(
                    "Unknown zone: '{}'. Valid options: INTAKE_LOWER, INTAKE_UPPER, EXHAUST_LOWER, EXHAUST_UPPER",
                    s
                ))
            })
    }
}

/// Board marking of an active-low PWM fan output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FanPort {
    #[serde(rename = "ONBOARD")]
    Onboard,
    #[serde(rename = "PN1")]
    Pn1,
    #[serde(rename = "PN2")]
    Pn2,
    #[serde(rename = "PN3")]
    Pn3,
    #[serde(rename = "PN4")]
    Pn4,
    #[serde(rename = "PN5")]
    Pn5,
}

impl FanPort {
    pub const ALL: [FanPort; 6] = [
        FanPort::Onboard,
        FanPort::Pn1,
        FanPort::Pn2,
        FanPort::Pn3,
        FanPort::Pn4,
        FanPort::Pn5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FanPort::Onboard => "ONBOARD",
            FanPort::Pn1 => "PN1",
            FanPort::Pn2 => "PN2",
            FanPort::Pn3 => "PN3",
            FanPort::Pn4 => "PN4",
            FanPort::Pn5 => "PN5",
        }
    }
}

impl fmt::Display for FanPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FanPort {
    type Err = OrvError;

    fn from_str(s: &str) -> Result<Self> {
        FanPort::ALL
            .into_iter()
            .find(|port| port.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrvError::InvalidInput(format!(
                    "Unknown fan port: '{}'. Valid options: ONBOARD, PN1-PN5",
                    s
                ))
            })
    }
}

/// Board marking of a thermistor input (10k NTC, beta 3950).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ThermistorPort {
    #[serde(rename = "TMP0")]
    Tmp0,
    #[serde(rename = "TMP1")]
    Tmp1,
    #[serde(rename = "TMP2")]
    Tmp2,
    #[serde(rename = "TMP3")]
    Tmp3,
    #[serde(rename = "TMP4")]
    Tmp4,
    #[serde(rename = "TMP5")]
    Tmp5,
    #[serde(rename = "TMP6")]
    Tmp6,
}

impl ThermistorPort {
    pub const ALL: [ThermistorPort; 7] = [
        ThermistorPort::Tmp0,
        ThermistorPort::Tmp1,
        ThermistorPort::Tmp2,
        ThermistorPort::Tmp3,
        ThermistorPort::Tmp4,
        ThermistorPort::Tmp5,
        ThermistorPort::Tmp6,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ThermistorPort::Tmp0 => "TMP0",
            ThermistorPort::Tmp1 => "TMP1",
            ThermistorPort::Tmp2 => "TMP2",
            ThermistorPort::Tmp3 => "TMP3",
            ThermistorPort::Tmp4 => "TMP4",
            ThermistorPort::Tmp5 => "TMP5",
            ThermistorPort::Tmp6 => "TMP6",
        }
    }
}

impl fmt::Display for ThermistorPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThermistorPort {
    type Err = OrvError;

    fn from_str(s: &str) -> Result<Self> {
        ThermistorPort::ALL
            .into_iter()
            .find(|port| port.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrvError::InvalidInput(format!(
                    "Unknown thermistor port: '{}'. Valid options: TMP0-TMP6",
                    s
                ))
            })
    }
}

/// Status LEDs soldered to the PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OnboardLed {
    Run,
    Web,
    Fault,
}

impl OnboardLed {
    pub const ALL: [OnboardLed; 3] = [OnboardLed::Run, OnboardLed::Web, OnboardLed::Fault];

    pub fn as_str(&self) -> &'static str {
        match self {
            OnboardLed::Run => "RUN",
            OnboardLed::Web => "WEB",
            OnboardLed::Fault => "FAULT",
        }
    }
}

impl fmt::Display for OnboardLed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OnboardLed {
    type Err = OrvError;

    fn from_str(s: &str) -> Result<Self> {
        OnboardLed::ALL
            .into_iter()
            .find(|led| led.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                OrvError::InvalidInput(format!(
                    "Unknown LED: '{}'. Valid options: RUN, WEB, FAULT",
                    s
                ))
            })
    }
}

/// Phase of a zone's thermal state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThermalPhase {
    /// Below the rise threshold, fans held at the idle floor
    Idle,
    /// Rise threshold crossed, duty ramping towards the curve
    Warming,
    /// Duty tracking the curve
    Active,
    /// Fall threshold crossed, duty ramping down to the idle floor
    Cooling,
}

/// Sensor/actuator health of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneHealth {
    Ok,
    /// Last read or write failed (or no sensor is wired); duty held
    Degraded,
    /// Consecutive read failures reached the threshold; duty forced to maximum
    Fault,
}

/// Externally reported state of a zone, as shown to the front ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZoneStatus {
    Idle,
    Warming,
    Active,
    Cooling,
    Override,
    Degraded,
    Fault,
}

impl ZoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneStatus::Idle => "idle",
            ZoneStatus::Warming => "warming",
            ZoneStatus::Active => "active",
            ZoneStatus::Cooling => "cooling",
            ZoneStatus::Override => "override",
            ZoneStatus::Degraded => "degraded",
            ZoneStatus::Fault => "fault",
        }
    }
}

impl From<ThermalPhase> for ZoneStatus {
    fn from(phase: ThermalPhase) -> Self {
        match phase {
            ThermalPhase::Idle => ZoneStatus::Idle,
            ThermalPhase::Warming => ZoneStatus::Warming,
            ThermalPhase::Active => ZoneStatus::Active,
            ThermalPhase::Cooling => ZoneStatus::Cooling,
        }
    }
}

/// Read-only copy of one zone's runtime state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub zone: Zone,
    /// Mean temperature in Celsius from the latest tick, `None` if the read failed
    pub temperature: Option<f64>,
    /// Duty currently applied to the zone's fans (0.0-1.0)
    pub duty: f64,
    pub state: ZoneStatus,
    pub phase: ThermalPhase,
    pub health: ZoneHealth,
    pub consecutive_failures: u32,
    /// Seconds left on a manual override, if one is active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub override_remaining_secs: Option<f64>,
    /// Seconds since the duty last changed
    pub secs_since_change: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub fan_count: usize,
    pub thermistor_count: usize,
}

/// Longest accepted override, one week.
pub const MAX_OVERRIDE_TTL_SECS: f64 = 7.0 * 24.0 * 3600.0;

/// A request from a front end to pin a zone's duty for a bounded time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub zone: Zone,
    pub duty: f64,
    pub ttl_secs: f64,
}

impl OverrideRequest {
    /// Build a validated override request.
    ///
    /// # Errors
    ///
    /// Returns `OverrideValidation` if `duty` is outside `[0, 1]` or `ttl_secs` is not a
    /// positive number of seconds no longer than [`MAX_OVERRIDE_TTL_SECS`].
    pub fn new(zone: Zone, duty: f64, ttl_secs: f64) -> Result<Self> {
        let request = Self {
            zone,
            duty,
            ttl_secs,
        };
        request.validate()?;
        Ok(request)
    }

    /// Check the bounds of a request that may have been deserialized directly.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.duty) {
            return Err(OrvError::OverrideValidation(format!(
                "duty must be between 0.0 and 1.0, got {}",
                self.duty
            )));
        }
        if !self.ttl_secs.is_finite() || self.ttl_secs <= 0.0 {
            return Err(OrvError::OverrideValidation(format!(
                "ttl must be a positive number of seconds, got {}",
                self.ttl_secs
            )));
        }
        if self.ttl_secs > MAX_OVERRIDE_TTL_SECS {
            return Err(OrvError::OverrideValidation(format!(
                "ttl must not exceed {} seconds, got {}",
                MAX_OVERRIDE_TTL_SECS, self.ttl_secs
            )));
        }
        Ok(())
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs_f64(self.ttl_secs)
    }
}
