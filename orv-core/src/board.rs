//! Board definitions and pin tables
//!
//! Each supported (platform, PCB revision) pair implements the `BoardConfig` trait,
//! which bundles its compile-time characteristics with the pin table translating board
//! markings (`PN1`, `TMP0`, `RUN`) into the physical addressing the I/O subsystem needs.
//!
//! Boards are looked up through [`PinTable::resolve`]. Adding a board means adding a
//! `BoardConfig` implementation and one entry in the registry below; nothing else in
//! the workspace has to change.
//!
//! Note: Actual hardware I/O is in the `orv-hardware` crate. This module only contains
//! board specifications and descriptor types.

use crate::error::{OrvError, Result};
use crate::types::{FanPort, OnboardLed, ThermistorPort};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Single-board computer driving the PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    #[serde(rename = "BeagleBoneBlack")]
    BeagleBoneBlack,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::BeagleBoneBlack => "BeagleBoneBlack",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = OrvError;

    /// Parse platform from string (for the `--platform` flag)
    ///
    /// # Examples
    ///
    /// ```
    /// use orv_core::board::Platform;
    ///
    /// assert!("BeagleBoneBlack".parse::<Platform>().is_ok());
    /// assert!("beagleboneblack".parse::<Platform>().is_ok());
    /// assert!("RaspberryPi".parse::<Platform>().is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "beagleboneblack" | "beaglebone-black" | "beaglebone_black" => {
                Ok(Platform::BeagleBoneBlack)
            }
            _ => Err(OrvError::UnsupportedPlatform {
                platform: s.to_string(),
                revision: "any".to_string(),
            }),
        }
    }
}

/// Revision of the Open Rack Vent PCB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PcbRevision {
    #[serde(rename = "v1.0.0")]
    V100,
}

impl PcbRevision {
    pub fn as_str(&self) -> &'static str {
        match self {
            PcbRevision::V100 => "v1.0.0",
        }
    }
}

impl fmt::Display for PcbRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PcbRevision {
    type Err = OrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().trim_start_matches(['v', 'V']) {
            "1.0.0" => Ok(PcbRevision::V100),
            _ => Err(OrvError::UnsupportedPlatform {
                platform: "any".to_string(),
                revision: s.to_string(),
            }),
        }
    }
}

/// A PWM output, addressed as `/dev/bone/pwm/{chip}/{channel}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PwmChannel {
    /// Expansion header pin, as accepted by `config-pin`
    pub header_pin: &'static str,
    pub chip: u8,
    pub channel: char,
}

/// An analog input, addressed as `in_voltage{index}_raw` on the IIO ADC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AdcChannel {
    pub header_pin: &'static str,
    pub index: u8,
}

/// A GPIO line, addressed by controller bank and offset within the bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct GpioLine {
    pub header_pin: &'static str,
    pub bank: u8,
    pub index: u8,
}

impl GpioLine {
    /// Kernel GPIO number (`bank * 32 + index`)
    pub fn number(&self) -> u32 {
        self.bank as u32 * 32 + self.index as u32
    }
}

/// Pin table for one (platform, revision) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinTableEntry {
    pub name: &'static str,
    pub platform: Platform,
    pub revision: PcbRevision,
    /// Full-scale reading of the ADC
    pub adc_max_counts: u16,
    /// PWM period written to every fan output
    pub pwm_period_ns: u32,
    pub fans: &'static [(FanPort, PwmChannel)],
    pub thermistors: &'static [(ThermistorPort, AdcChannel)],
    pub leds: &'static [(OnboardLed, GpioLine)],
}

impl PinTableEntry {
    pub fn fan(&self, port: FanPort) -> Option<&PwmChannel> {
        self.fans.iter().find(|(p, _)| *p == port).map(|(_, pin)| pin)
    }

    pub fn thermistor(&self, port: ThermistorPort) -> Option<&AdcChannel> {
        self.thermistors
            .iter()
            .find(|(p, _)| *p == port)
            .map(|(_, pin)| pin)
    }

    pub fn led(&self, led: OnboardLed) -> Option<&GpioLine> {
        self.leds.iter().find(|(l, _)| *l == led).map(|(_, pin)| pin)
    }

    /// Convert to runtime board info
    pub fn to_board_info(&self) -> BoardInfo {
        BoardInfo {
            name: self.name.to_string(),
            platform: self.platform,
            revision: self.revision,
            fan_ports: self.fans.iter().map(|(port, _)| *port).collect(),
            thermistor_ports: self.thermistors.iter().map(|(port, _)| *port).collect(),
            adc_max_counts: self.adc_max_counts,
            pwm_period_ns: self.pwm_period_ns,
        }
    }
}

/// Hardware board configuration trait
///
/// # Example
///
/// ```
/// use orv_core::board::{BeagleBoneBlackV100, BoardConfig};
///
/// const NAME: &str = BeagleBoneBlackV100::NAME;
/// assert_eq!(BeagleBoneBlackV100::PINS.fans.len(), 6);
/// ```
pub trait BoardConfig: Send + Sync + 'static {
    /// Human-readable board name
    const NAME: &'static str;

    const PLATFORM: Platform;

    const REVISION: PcbRevision;

    /// Full-scale ADC reading
    const ADC_MAX_COUNTS: u16;

    /// Default PWM period in nanoseconds
    const PWM_PERIOD_NS: u32;

    const FANS: &'static [(FanPort, PwmChannel)];

    const THERMISTORS: &'static [(ThermistorPort, AdcChannel)];

    const LEDS: &'static [(OnboardLed, GpioLine)];

    /// The assembled pin table
    const PINS: PinTableEntry = PinTableEntry {
        name: Self::NAME,
        platform: Self::PLATFORM,
        revision: Self::REVISION,
        adc_max_counts: Self::ADC_MAX_COUNTS,
        pwm_period_ns: Self::PWM_PERIOD_NS,
        fans: Self::FANS,
        thermistors: Self::THERMISTORS,
        leds: Self::LEDS,
    };
}

/// Open Rack Vent v1.0.0 PCB on a BeagleBone Black
///
/// - 6 PWM fan outputs (ONBOARD, PN1-PN5), 25 kHz
/// - 7 thermistor inputs on the 12-bit AM335x ADC (1.8 V reference)
/// - RUN / WEB / FAULT status LEDs on GPIO
pub struct BeagleBoneBlackV100;

impl BoardConfig for BeagleBoneBlackV100 {
    const NAME: &'static str = "Open Rack Vent v1.0.0 (BeagleBone Black)";
    const PLATFORM: Platform = Platform::BeagleBoneBlack;
    const REVISION: PcbRevision = PcbRevision::V100;
    const ADC_MAX_COUNTS: u16 = 4095;
    const PWM_PERIOD_NS: u32 = 40_000;

    const FANS: &'static [(FanPort, PwmChannel)] = &[
        (FanPort::Onboard, pwm("P8_13", 2, 'b')),
        (FanPort::Pn1, pwm("P9_14", 1, 'a')),
        (FanPort::Pn2, pwm("P9_16", 1, 'b')),
        (FanPort::Pn3, pwm("P9_22", 0, 'a')),
        (FanPort::Pn4, pwm("P9_29", 0, 'b')),
        (FanPort::Pn5, pwm("P8_19", 2, 'a')),
    ];

    const THERMISTORS: &'static [(ThermistorPort, AdcChannel)] = &[
        (ThermistorPort::Tmp0, adc("P9_35", 6)),
        (ThermistorPort::Tmp1, adc("P9_36", 5)),
        (ThermistorPort::Tmp2, adc("P9_33", 4)),
        (ThermistorPort::Tmp3, adc("P9_37", 2)),
        (ThermistorPort::Tmp4, adc("P9_39", 0)),
        (ThermistorPort::Tmp5, adc("P9_38", 3)),
        (ThermistorPort::Tmp6, adc("P9_40", 1)),
    ];

    const LEDS: &'static [(OnboardLed, GpioLine)] = &[
        (OnboardLed::Run, gpio("P9_13", 0, 31)),
        (OnboardLed::Web, gpio("P9_12", 1, 28)),
        (OnboardLed::Fault, gpio("P9_11", 0, 30)),
    ];
}

const fn pwm(header_pin: &'static str, chip: u8, channel: char) -> PwmChannel {
    PwmChannel {
        header_pin,
        chip,
        channel,
    }
}

const fn adc(header_pin: &'static str, index: u8) -> AdcChannel {
    AdcChannel { header_pin, index }
}

const fn gpio(header_pin: &'static str, bank: u8, index: u8) -> GpioLine {
    GpioLine {
        header_pin,
        bank,
        index,
    }
}

/// Every board the daemon knows how to drive.
static REGISTRY: &[&PinTableEntry] = &[&BeagleBoneBlackV100::PINS];

/// Static lookup from (platform, revision) to a pin table.
pub struct PinTable;

impl PinTable {
    /// Resolve the pin table for a platform and PCB revision.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedPlatform` if no board is registered for the pair.
    pub fn resolve(platform: Platform, revision: PcbRevision) -> Result<&'static PinTableEntry> {
        Self::resolve_in(REGISTRY, platform, revision)
    }

    /// Resolve against an explicit registry.
    pub fn resolve_in(
        registry: &[&'static PinTableEntry],
        platform: Platform,
        revision: PcbRevision,
    ) -> Result<&'static PinTableEntry> {
        registry
            .iter()
            .copied()
            .find(|entry| entry.platform == platform && entry.revision == revision)
            .ok_or_else(|| OrvError::UnsupportedPlatform {
                platform: platform.to_string(),
                revision: revision.to_string(),
            })
    }
}

/// Runtime board information, shared with the front ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoardInfo {
    pub name: String,
    pub platform: Platform,
    pub revision: PcbRevision,
    pub fan_ports: Vec<FanPort>,
    pub thermistor_ports: Vec<ThermistorPort>,
    pub adc_max_counts: u16,
    pub pwm_period_ns: u32,
}
