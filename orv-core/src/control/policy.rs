//! Per-zone control policy

use super::curve::ThermalCurve;
use crate::error::{OrvError, Result};
use serde::{Deserialize, Serialize};

/// Tuning for one zone's state machine.
///
/// Any field may be omitted in TOML; missing fields take the defaults below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ZonePolicy {
    /// Temperature at or above which an idle or cooling zone starts warming
    pub rise_threshold_c: f64,
    /// Temperature below which a warming or active zone starts cooling
    pub fall_threshold_c: f64,
    /// Temperature at or above which fans run at full duty regardless of the curve
    pub safety_threshold_c: f64,
    /// Idle floor while the zone has fans
    pub min_duty: f64,
    /// Smallest duty change worth writing
    pub deadband: f64,
    /// Largest duty change per tick
    pub max_step: f64,
    pub curve: ThermalCurve,
}

impl Default for ZonePolicy {
    fn default() -> Self {
        Self {
            rise_threshold_c: 35.0,
            fall_threshold_c: 30.0,
            safety_threshold_c: 60.0,
            min_duty: 0.2,
            deadband: 0.05,
            max_step: 0.25,
            curve: ThermalCurve::default(),
        }
    }
}

impl ZonePolicy {
    /// Check thresholds, duty bounds and the curve.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(OrvError::Config(msg));

        for (name, value) in [
            ("rise_threshold_c", self.rise_threshold_c),
            ("fall_threshold_c", self.fall_threshold_c),
            ("safety_threshold_c", self.safety_threshold_c),
        ] {
            if !value.is_finite() {
                return invalid(format!("{} must be a finite temperature", name));
            }
        }

        if self.rise_threshold_c <= self.fall_threshold_c {
            return invalid(format!(
                "rise_threshold_c ({}) must be greater than fall_threshold_c ({})",
                self.rise_threshold_c, self.fall_threshold_c
            ));
        }
        if self.safety_threshold_c <= self.rise_threshold_c {
            return invalid(format!(
                "safety_threshold_c ({}) must be greater than rise_threshold_c ({})",
                self.safety_threshold_c, self.rise_threshold_c
            ));
        }
        if !(self.min_duty > 0.0 && self.min_duty <= 1.0) {
            return invalid(format!("min_duty must be in (0, 1], got {}", self.min_duty));
        }
        if !(0.0..1.0).contains(&self.deadband) {
            return invalid(format!("deadband must be in [0, 1), got {}", self.deadband));
        }
        if !(self.max_step > 0.0 && self.max_step <= 1.0) {
            return invalid(format!("max_step must be in (0, 1], got {}", self.max_step));
        }

        self.curve
            .validate()
            .map_err(|e| OrvError::Config(format!("curve: {}", e)))
    }
}
