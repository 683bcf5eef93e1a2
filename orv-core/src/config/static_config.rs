//! Static configuration loaded once at startup
//!
//! This configuration is read-only after the daemon starts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::control::{ControlLimits, ZonePolicy};
use crate::error::{OrvError, Result};
use crate::types::{Zone, MAX_OVERRIDE_TTL_SECS};
use crate::wire_mapping::DEFAULT_WIRE_MAPPING_JSON;

/// HTTP API configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Serve the HTTP API
    pub enabled: bool,
    /// Address to bind
    pub hostname: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hostname: "0.0.0.0".to_string(),
            port: 3000,
        }
    }
}

/// MQTT adapter configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub enabled: bool,
    /// Broker hostname
    pub host: String,
    pub port: u16,
    /// Client id and topic prefix
    pub device_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Seconds between state publications
    pub publish_interval_secs: u64,
    /// Lifetime of overrides created by `set` commands
    pub override_ttl_secs: f64,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            device_id: "open-rack-vent".to_string(),
            username: None,
            password: None,
            publish_interval_secs: 10,
            override_ttl_secs: 300.0,
        }
    }
}

/// Control loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Milliseconds between control ticks
    pub tick_interval_ms: u64,
    /// Upper bound on a single sensor read or actuator write
    pub io_timeout_ms: u64,
    /// Consecutive failed reads before a zone is faulted
    pub failure_threshold: u32,
    /// Duty applied to every zone until its first reading
    pub startup_duty: f64,
    /// PWM period; the board's default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pwm_period_ns: Option<u32>,
    /// Policy for zones without their own entry
    pub policy: ZonePolicy,
    /// Per-zone policies keyed by zone name (`INTAKE_LOWER`, ...)
    pub zones: BTreeMap<String, ZonePolicy>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
            io_timeout_ms: 500,
            failure_threshold: 3,
            startup_duty: 1.0,
            pwm_period_ns: None,
            policy: ZonePolicy::default(),
            zones: BTreeMap::new(),
        }
    }
}

/// Shutdown behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Duty written to every fan when the daemon exits
    pub safe_duty: f64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self { safe_duty: 1.0 }
    }
}

/// Static configuration for the Open Rack Vent daemon.
///
/// This is loaded once at startup and remains immutable during runtime.
/// Located at `~/.config/open-rack-vent/config.toml` by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticConfig {
    /// Platform name, e.g. `BeagleBoneBlack`
    #[serde(default = "default_platform")]
    pub platform: String,
    /// PCB revision, e.g. `v1.0.0`
    #[serde(default = "default_pcb_revision")]
    pub pcb_revision: String,
    /// Wire mapping JSON; the factory wiring when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wire_mapping: Option<String>,

    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_platform() -> String {
    "BeagleBoneBlack".to_string()
}

fn default_pcb_revision() -> String {
    "v1.0.0".to_string()
}

impl Default for StaticConfig {
    fn default() -> Self {
        Self {
            platform: default_platform(),
            pcb_revision: default_pcb_revision(),
            wire_mapping: None,
            server: ServerConfig::default(),
            mqtt: MqttConfig::default(),
            control: ControlConfig::default(),
            shutdown: ShutdownConfig::default(),
        }
    }
}

impl StaticConfig {
    /// Parse StaticConfig from TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Serialize StaticConfig to TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OrvError::Serialization(e.to_string()))
    }

    /// The configured wire mapping, or the factory wiring.
    pub fn wire_mapping_json(&self) -> &str {
        self.wire_mapping
            .as_deref()
            .unwrap_or(DEFAULT_WIRE_MAPPING_JSON)
    }

    /// Policy for a zone: its own entry if present, else the shared default.
    pub fn policy_for(&self, zone: Zone) -> &ZonePolicy {
        self.control
            .zones
            .iter()
            .find(|(name, _)| name.parse::<Zone>().ok() == Some(zone))
            .map(|(_, policy)| policy)
            .unwrap_or(&self.control.policy)
    }

    pub fn limits(&self) -> ControlLimits {
        ControlLimits {
            failure_threshold: self.control.failure_threshold,
            startup_duty: self.control.startup_duty,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.control.tick_interval_ms)
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.control.io_timeout_ms)
    }

    /// Check every value the daemon relies on before it starts.
    pub fn validate(&self) -> Result<()> {
        let control = &self.control;

        if control.tick_interval_ms == 0 {
            return Err(OrvError::Config("control.tick_interval_ms must be positive".into()));
        }
        if control.io_timeout_ms == 0 {
            return Err(OrvError::Config("control.io_timeout_ms must be positive".into()));
        }
        if control.failure_threshold == 0 {
            return Err(OrvError::Config(
                "control.failure_threshold must be at least 1".into(),
            ));
        }
        if control.pwm_period_ns == Some(0) {
            return Err(OrvError::Config("control.pwm_period_ns must be positive".into()));
        }
        check_duty("control.startup_duty", control.startup_duty)?;
        check_duty("shutdown.safe_duty", self.shutdown.safe_duty)?;

        control
            .policy
            .validate()
            .map_err(|e| OrvError::Config(format!("control.policy: {}", e)))?;

        for (name, policy) in &control.zones {
            name.parse::<Zone>().map_err(|_| {
                OrvError::Config(format!("control.zones: unknown zone '{}'", name))
            })?;
            policy
                .validate()
                .map_err(|e| OrvError::Config(format!("control.zones.{}: {}", name, e)))?;
        }

        if self.mqtt.enabled {
            if self.mqtt.publish_interval_secs == 0 {
                return Err(OrvError::Config(
                    "mqtt.publish_interval_secs must be positive".into(),
                ));
            }
            let ttl = self.mqtt.override_ttl_secs;
            if !(ttl > 0.0 && ttl <= MAX_OVERRIDE_TTL_SECS) {
                return Err(OrvError::Config(format!(
                    "mqtt.override_ttl_secs must be in (0, {}], got {}",
                    MAX_OVERRIDE_TTL_SECS, ttl
                )));
            }
        }

        Ok(())
    }
}

fn check_duty(field: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(OrvError::Config(format!(
            "{} must be between 0.0 and 1.0, got {}",
            field, value
        )))
    }
}
