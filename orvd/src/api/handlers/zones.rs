//! Zone handlers: snapshots, temperatures and manual overrides
//!
//! Zone path segments accept the canonical name or its lowercase form
//! (`INTAKE_LOWER`, `intake_lower`).

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::{api_fail, api_ok};
use axum::{
    extract::{Path, State},
    Json,
};
use orv_core::api::{self, OverrideBody};
use orv_core::{OrvError, OverrideRequest, Zone, ZoneSnapshot};
use tracing::{debug, info};

fn parse_zone(raw: &str) -> Result<Zone, ApiError> {
    raw.parse::<Zone>().map_err(ApiError::from)
}

async fn snapshot_of(state: &AppState, zone: Zone) -> Result<ZoneSnapshot, ApiError> {
    state
        .control
        .snapshot(zone)
        .await
        .ok_or_else(|| ApiError::internal_error(format!("No state published for {}", zone)))
}

/// Lists every zone's latest snapshot.
///
/// # Endpoint
///
/// `GET /api/v0/zones`
pub(crate) async fn list_zones(
    State(state): State<AppState>,
) -> Result<Json<api::ApiResponse<api::ZoneListResponse>>, ApiError> {
    debug!("Request: GET /api/v0/zones");

    let zones = state.control.snapshots().await;
    api_ok!(api::ZoneListResponse { zones })
}

/// Gets one zone's latest snapshot.
///
/// # Endpoint
///
/// `GET /api/v0/zone/:zone`
pub(crate) async fn get_zone(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<api::ApiResponse<ZoneSnapshot>>, ApiError> {
    debug!("Request: GET /api/v0/zone/{}", raw);

    let zone = parse_zone(&raw)?;
    api_ok!(snapshot_of(&state, zone).await?)
}

/// Gets a zone's mean temperature from the latest tick.
///
/// Fails with 503 when the zone has no thermistor or its last read failed.
///
/// # Endpoint
///
/// `GET /api/v0/zone/:zone/temperature`
pub(crate) async fn get_temperature(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<api::ApiResponse<api::TemperatureResponse>>, ApiError> {
    debug!("Request: GET /api/v0/zone/{}/temperature", raw);

    let zone = parse_zone(&raw)?;
    let snapshot = snapshot_of(&state, zone).await?;

    if snapshot.thermistor_count == 0 {
        return Err(OrvError::NoSensor(zone).into());
    }
    let Some(temperature) = state.control.temperature(zone).await else {
        return Err(ApiError::service_unavailable(format!(
            "Temperature of {} unavailable: {}",
            zone,
            snapshot.last_error.as_deref().unwrap_or("no reading yet")
        )));
    };

    api_ok!(api::TemperatureResponse {
        zone,
        temperature,
        thermistor_count: snapshot.thermistor_count,
    })
}

/// Pins a zone's duty for a bounded time.
///
/// The override takes effect on the next control tick.
///
/// # Endpoint
///
/// `POST /api/v0/zone/:zone/override`
///
/// # Request Body
///
/// ```json
/// {"duty": 1.0, "ttl_secs": 30}
/// ```
pub(crate) async fn set_override(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(body): Json<OverrideBody>,
) -> Result<Json<api::ApiResponse<OverrideRequest>>, ApiError> {
    debug!("Request: POST /api/v0/zone/{}/override", raw);

    let zone = parse_zone(&raw)?;
    if snapshot_of(&state, zone).await?.fan_count == 0 {
        return api_fail!(format!("{} has no fans to override", zone));
    }

    let request = body.into_request(zone)?;
    state.control.submit_override(request)?;

    info!(
        "Queued override for {}: {:.2} for {}s",
        zone, request.duty, request.ttl_secs
    );
    api_ok!(request)
}

/// Drops a zone's override and returns it to automatic control.
///
/// # Endpoint
///
/// `DELETE /api/v0/zone/:zone/override`
pub(crate) async fn clear_override(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<api::ApiResponse<()>>, ApiError> {
    debug!("Request: DELETE /api/v0/zone/{}/override", raw);

    let zone = parse_zone(&raw)?;
    state.control.clear_override(zone)?;

    info!("Queued override removal for {}", zone);
    api_ok!(())
}
