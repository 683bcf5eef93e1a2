//! Temperature-to-duty curves
//!
//! Curves map a zone temperature to a fan duty fraction. The default curve linearly
//! interpolates between configured points and clamps outside them.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maps a temperature to a fan duty. Implementations must be monotonic
/// non-decreasing in temperature and return values in `[0, 1]`.
pub trait DutyCurve: Send + Sync + fmt::Debug {
    fn duty_for(&self, celsius: f64) -> f64;
}

/// A single point on a thermal curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// Temperature in Celsius
    pub temp_c: f64,
    /// Duty fraction (0.0-1.0)
    pub duty: f64,
}

impl CurvePoint {
    pub fn new(temp_c: f64, duty: f64) -> Self {
        Self { temp_c, duty }
    }
}

/// Piecewise-linear thermal curve.
///
/// Serialized as a bare list of points:
///
/// ```toml
/// curve = [{ temp_c = 35.0, duty = 0.4 }, { temp_c = 55.0, duty = 1.0 }]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThermalCurve {
    points: Vec<CurvePoint>,
}

impl ThermalCurve {
    /// Points should be sorted by temperature in ascending order; see [`validate`](Self::validate).
    pub fn new(points: Vec<CurvePoint>) -> Self {
        Self { points }
    }

    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Interpolate the duty for a given temperature.
    ///
    /// - Returns the first point's duty below the first point
    /// - Returns the last point's duty above the last point
    /// - Linearly interpolates between surrounding points otherwise
    pub fn interpolate(&self, temp: f64) -> f64 {
        let (first, last) = match (self.points.first(), self.points.last()) {
            (Some(first), Some(last)) => (first, last),
            _ => return 1.0,
        };

        if temp <= first.temp_c {
            return first.duty;
        }
        if temp >= last.temp_c {
            return last.duty;
        }

        for window in self.points.windows(2) {
            let (p1, p2) = (&window[0], &window[1]);
            if temp >= p1.temp_c && temp <= p2.temp_c {
                let ratio = (temp - p1.temp_c) / (p2.temp_c - p1.temp_c);
                let duty = p1.duty + ratio * (p2.duty - p1.duty);
                return duty.clamp(0.0, 1.0);
            }
        }

        // NaN temperatures fall through every comparison
        last.duty
    }

    /// Validate the thermal curve.
    ///
    /// Returns Ok if valid, or an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.points.len() < 2 {
            return Err("Thermal curve must have at least 2 points".to_string());
        }

        for point in &self.points {
            if !point.temp_c.is_finite() || point.temp_c < -50.0 || point.temp_c > 150.0 {
                return Err(format!(
                    "Temperature {} is outside valid range (-50 to 150)",
                    point.temp_c
                ));
            }
            if !(0.0..=1.0).contains(&point.duty) {
                return Err(format!(
                    "Duty {} at temperature {} is outside 0.0-1.0",
                    point.duty, point.temp_c
                ));
            }
        }

        for window in self.points.windows(2) {
            if window[0].temp_c >= window[1].temp_c {
                return Err(format!(
                    "Points must be in ascending temperature order: {} >= {}",
                    window[0].temp_c, window[1].temp_c
                ));
            }
            if window[0].duty > window[1].duty {
                return Err(format!(
                    "Duty must not decrease as temperature rises: {} at {} > {} at {}",
                    window[0].duty, window[0].temp_c, window[1].duty, window[1].temp_c
                ));
            }
        }

        Ok(())
    }
}

impl Default for ThermalCurve {
    fn default() -> Self {
        Self::new(vec![
            CurvePoint::new(35.0, 0.4),
            CurvePoint::new(45.0, 0.7),
            CurvePoint::new(55.0, 1.0),
        ])
    }
}

impl DutyCurve for ThermalCurve {
    fn duty_for(&self, celsius: f64) -> f64 {
        self.interpolate(celsius)
    }
}
