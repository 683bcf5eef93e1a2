//! Info handlers for daemon information and root endpoint

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;

use axum::{extract::State, Json};
use orv_core::api::{ApiResponse, InfoResponse};
use serde_json::{json, Value};
use tracing::debug;

/// Handle the root endpoint.
///
/// Basic service identification, useful as a health check.
///
/// # Endpoint
///
/// `GET /`
pub(crate) async fn root() -> Result<Json<ApiResponse<Value>>, ApiError> {
    debug!("Request: GET /");

    let data = json!({
        "service": "Open Rack Vent Daemon",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "ok"
    });

    api_ok!(data)
}

/// Retrieve daemon information.
///
/// # Endpoint
///
/// `GET /api/v0/info`
///
/// # Returns
///
/// - `version` - Daemon version
/// - `board` - Resolved platform, revision and pin table summary
/// - `wire_mapping` - The active wire mapping
/// - `uptime` - Daemon uptime in seconds
/// - `tick_interval_ms` - Control loop period
/// - `mqtt_enabled` - Whether the MQTT adapter is running
pub(crate) async fn get_info(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<InfoResponse>>, ApiError> {
    debug!("Request: GET /api/v0/info");

    let info_response = InfoResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        software: format!("orvd v{}", env!("CARGO_PKG_VERSION")),
        board: (*state.board_info).clone(),
        wire_mapping: (*state.wire_mapping).clone(),
        uptime: state.start_time.elapsed().as_secs(),
        tick_interval_ms: state.tick_interval_ms,
        mqtt_enabled: state.mqtt_enabled,
    };

    api_ok!(info_response)
}
