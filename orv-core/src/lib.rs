//! Open Rack Vent Core Library
//!
//! Shared types, wiring validation, pin tables, control logic and configuration for
//! the Open Rack Vent daemon. Nothing in this crate performs I/O.

pub mod api;
pub mod board;
pub mod config;
pub mod control;
pub mod error;
pub mod types;
pub mod wire_mapping;

// Re-export commonly used types
pub use board::*;
pub use config::{default_config_path, StaticConfig};
pub use control::{ControlLimits, CurvePoint, DutyCurve, ThermalCurve, ZoneController, ZonePolicy};
pub use error::*;
pub use types::*;
pub use wire_mapping::{WireMapping, DEFAULT_WIRE_MAPPING_JSON};
