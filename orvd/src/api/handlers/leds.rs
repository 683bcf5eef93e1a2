//! Onboard LED handlers

use crate::api::error::ApiError;
use crate::api::AppState;
use crate::api_ok;
use axum::{
    extract::{Path, State},
    Json,
};
use orv_core::api::{ApiResponse, LedBody, LedResponse};
use orv_core::OnboardLed;
use tracing::{debug, info};

/// Switches an onboard LED on or off.
///
/// The state is applied on the next control tick and holds until the daemon
/// next drives that LED itself.
///
/// # Endpoint
///
/// `POST /api/v0/led/:led`
///
/// # Request Body
///
/// ```json
/// {"on": true}
/// ```
pub(crate) async fn set_led(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(body): Json<LedBody>,
) -> Result<Json<ApiResponse<LedResponse>>, ApiError> {
    debug!("Request: POST /api/v0/led/{}", raw);

    let led: OnboardLed = raw.parse()?;
    state.control.set_led(led, body.on)?;

    info!("Queued {} LED {}", led, if body.on { "on" } else { "off" });
    api_ok!(LedResponse { led, on: body.on })
}
