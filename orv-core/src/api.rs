//! API models for the Open Rack Vent REST API
//!
//! This module contains request and response models for the REST API.

use crate::board::BoardInfo;
use crate::error::Result;
use crate::types::{OnboardLed, OverrideRequest, Zone, ZoneSnapshot};
use serde::{Deserialize, Serialize};

/// Generic API response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum ApiResponse<T> {
    #[serde(rename = "success")]
    Success { data: T },
    #[serde(rename = "error")]
    Error { error: String },
}

impl<T> ApiResponse<T> {
    /// Create a successful response
    pub fn success(data: T) -> Self {
        Self::Success { data }
    }

    /// Create an error response
    pub fn error(error: String) -> Self {
        Self::Error { error }
    }
}

/// Daemon information response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfoResponse {
    /// Daemon version
    pub version: String,
    /// Software information
    pub software: String,
    /// Resolved board and pin table summary
    pub board: BoardInfo,
    /// Active wire mapping, in its JSON form
    pub wire_mapping: serde_json::Value,
    /// Daemon uptime in seconds
    pub uptime: u64,
    /// Control tick interval in milliseconds
    pub tick_interval_ms: u64,
    /// Whether the MQTT adapter is running
    pub mqtt_enabled: bool,
}

/// All zones, in zone order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneListResponse {
    pub zones: Vec<ZoneSnapshot>,
}

/// Latest temperature of one zone
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureResponse {
    pub zone: Zone,
    /// Mean of the zone's thermistors in Celsius from the latest tick
    pub temperature: f64,
    pub thermistor_count: usize,
}

/// Override request body; the zone comes from the path
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OverrideBody {
    /// Duty fraction (0.0-1.0)
    pub duty: f64,
    /// Override lifetime in seconds
    pub ttl_secs: f64,
}

impl OverrideBody {
    /// Validate against a zone.
    pub fn into_request(self, zone: Zone) -> Result<OverrideRequest> {
        OverrideRequest::new(zone, self.duty, self.ttl_secs)
    }
}

/// LED request body; the LED comes from the path
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LedBody {
    pub on: bool,
}

/// State queued for an onboard LED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedResponse {
    pub led: OnboardLed,
    pub on: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OrvError;

    #[test]
    fn test_api_response_envelope() {
        let ok: ApiResponse<u32> = ApiResponse::success(7);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "success");
        assert_eq!(json["data"], 7);

        let err: ApiResponse<u32> = ApiResponse::error("nope".to_string());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"], "nope");
    }

    #[test]
    fn test_override_body() {
        let body: OverrideBody = serde_json::from_str(r#"{"duty": 0.8, "ttl_secs": 60}"#).unwrap();
        let request = body.into_request(Zone::ExhaustLower).unwrap();
        assert_eq!(request.zone, Zone::ExhaustLower);
        assert_eq!(request.duty, 0.8);

        let body = OverrideBody {
            duty: 2.0,
            ttl_secs: 60.0,
        };
        assert!(matches!(
            body.into_request(Zone::ExhaustLower),
            Err(OrvError::OverrideValidation(_))
        ));
    }
}
