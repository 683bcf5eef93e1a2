//! Error types for the Open Rack Vent system

use crate::board::{PcbRevision, Platform};
use crate::types::Zone;
use thiserror::Error;

/// Core error type for Open Rack Vent operations
#[derive(Error, Debug)]
pub enum OrvError {
    /// Wiring payload has the wrong shape, unknown names or an unsupported version
    #[error("Schema error at '{field}': {reason}")]
    Schema { field: String, reason: String },

    /// The same port is wired to two zones
    #[error("Port {port} is assigned to both {first} and {second}")]
    Conflict {
        port: String,
        first: Zone,
        second: Zone,
    },

    /// A port referenced by the wiring has no pin on the selected board
    #[error("Port {port} used by {zone} does not exist on {platform} {revision}")]
    UnknownPort {
        zone: Zone,
        port: String,
        platform: Platform,
        revision: PcbRevision,
    },

    /// No pin table is registered for the platform/revision pair
    #[error("Unsupported platform '{platform}' with PCB revision '{revision}'")]
    UnsupportedPlatform { platform: String, revision: String },

    /// The hardware interface was handed a mapping the pin table cannot resolve
    #[error("Port {0} cannot be resolved to a physical pin")]
    UnresolvedPort(String),

    /// A temperature was requested for a zone without thermistors
    #[error("Zone {0} has no thermistors assigned")]
    NoSensor(Zone),

    /// A sensor read did not complete within the I/O timeout
    #[error("Timed out reading {0}")]
    ReadTimeout(String),

    /// A sensor read failed or produced an implausible value
    #[error("Failed to read {target}: {reason}")]
    ReadFailure { target: String, reason: String },

    /// An actuator write failed or timed out
    #[error("Failed to write {target}: {reason}")]
    WriteFailure { target: String, reason: String },

    /// Override request rejected at the boundary
    #[error("Invalid override: {0}")]
    OverrideValidation(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl OrvError {
    /// Whether this error means "the sensor could not be read" and should count
    /// towards a zone's fault escalation.
    pub fn is_read_failure(&self) -> bool {
        matches!(
            self,
            OrvError::ReadTimeout(_) | OrvError::ReadFailure { .. } | OrvError::Io(_)
        )
    }
}

/// Result type alias for Open Rack Vent operations
pub type Result<T> = std::result::Result<T, OrvError>;

impl From<serde_json::Error> for OrvError {
    fn from(err: serde_json::Error) -> Self {
        OrvError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for OrvError {
    fn from(err: toml::de::Error) -> Self {
        OrvError::Config(err.to_string())
    }
}
