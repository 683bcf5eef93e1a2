//! Thermal control logic
//!
//! Pure decision logic for the control loop: duty curves, per-zone tuning and the
//! per-zone state machine. The daemon drives it with readings and writes the
//! resulting duties through the hardware interface.

pub mod curve;
pub mod policy;
pub mod zone;

pub use curve::{CurvePoint, DutyCurve, ThermalCurve};
pub use policy::ZonePolicy;
pub use zone::{ControlLimits, ZoneController};
