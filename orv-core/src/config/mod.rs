//! Configuration types for Open Rack Vent
//!
//! A single [`StaticConfig`] TOML file is read once at startup. Nothing is written
//! back at runtime; the control loop keeps no persisted state.

mod paths;
mod static_config;

pub use paths::default_config_path;
pub use static_config::{ControlConfig, MqttConfig, ServerConfig, ShutdownConfig, StaticConfig};
