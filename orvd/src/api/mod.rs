//! HTTP API for the Open Rack Vent daemon
//!
//! A thin axum adapter over the control loop: every handler reads published
//! snapshots or queues a command through the [`ControlHandle`]. No handler touches
//! the hardware.

pub(crate) mod handlers;

use crate::control::ControlHandle;
use axum::{
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use orv_core::BoardInfo;
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

/// Shared state handed to every handler
#[derive(Clone)]
pub(crate) struct AppState {
    pub control: ControlHandle,
    pub board_info: Arc<BoardInfo>,
    /// Active wire mapping, as served by `/api/v0/info`
    pub wire_mapping: Arc<serde_json::Value>,
    pub start_time: Instant,
    pub tick_interval_ms: u64,
    pub mqtt_enabled: bool,
}

impl AppState {
    pub fn new(
        control: ControlHandle,
        board_info: BoardInfo,
        wire_mapping: serde_json::Value,
        tick_interval_ms: u64,
        mqtt_enabled: bool,
    ) -> Self {
        Self {
            control,
            board_info: Arc::new(board_info),
            wire_mapping: Arc::new(wire_mapping),
            start_time: Instant::now(),
            tick_interval_ms,
            mqtt_enabled,
        }
    }
}

pub(crate) fn create_router(state: AppState) -> Router {
    info!("Setting up API router...");

    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(tower_http::cors::Any);

    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(64 * 1024));

    Router::new()
        .route("/api/v0/zones", get(handlers::zones::list_zones))
        .route("/api/v0/zone/:zone", get(handlers::zones::get_zone))
        .route(
            "/api/v0/zone/:zone/temperature",
            get(handlers::zones::get_temperature),
        )
        .route(
            "/api/v0/zone/:zone/override",
            axum::routing::post(handlers::zones::set_override)
                .delete(handlers::zones::clear_override),
        )
        .route("/api/v0/led/:led", axum::routing::post(handlers::leds::set_led))
        .route("/api/v0/info", get(handlers::info::get_info))
        .route("/", get(handlers::info::root))
        .layer(middleware_stack)
        .with_state(state)
}

pub(crate) mod error {
    use axum::{
        http::StatusCode,
        response::{IntoResponse, Response},
        Json,
    };
    use orv_core::api::ApiResponse;
    use orv_core::OrvError;

    use tracing::error;

    #[derive(Debug)]
    pub struct ApiError {
        pub status_code: StatusCode,
        pub message: String,
    }

    impl ApiError {
        pub fn new(status_code: StatusCode, message: impl Into<String>) -> Self {
            Self {
                status_code,
                message: message.into(),
            }
        }

        pub fn bad_request(message: impl Into<String>) -> Self {
            Self::new(StatusCode::BAD_REQUEST, message)
        }

        pub fn internal_error(message: impl Into<String>) -> Self {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
        }

        pub fn service_unavailable(message: impl Into<String>) -> Self {
            Self::new(StatusCode::SERVICE_UNAVAILABLE, message)
        }
    }

    impl IntoResponse for ApiError {
        fn into_response(self) -> Response {
            error!("API Error {}: {}", self.status_code, self.message);

            let response: ApiResponse<()> = ApiResponse::error(self.message);

            (self.status_code, Json(response)).into_response()
        }
    }

    impl From<OrvError> for ApiError {
        fn from(err: OrvError) -> Self {
            match err {
                OrvError::OverrideValidation(_) | OrvError::InvalidInput(_) => {
                    Self::bad_request(err.to_string())
                }
                OrvError::NoSensor(_)
                | OrvError::ReadTimeout(_)
                | OrvError::ReadFailure { .. }
                | OrvError::WriteFailure { .. } => Self::service_unavailable(err.to_string()),
                _ => Self::internal_error(err.to_string()),
            }
        }
    }
}

#[macro_export]
macro_rules! api_ok {
    ($data:expr) => {
        Ok(axum::Json(orv_core::api::ApiResponse::success($data)))
    };
}

#[macro_export]
macro_rules! api_fail {
    ($message:expr) => {
        Err($crate::api::error::ApiError::bad_request($message))
    };
}
