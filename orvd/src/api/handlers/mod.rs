//! API request handlers for the Open Rack Vent daemon REST API.
//!
//! - [`info`] - Service identification and daemon information
//! - [`leds`] - Onboard status LED overrides
//! - [`zones`] - Zone snapshots, temperatures and manual overrides
//!
//! Handlers take `State<AppState>`, return `Result<Json<ApiResponse<T>>, ApiError>`
//! and build responses with the `api_ok!()` and `api_fail!()` macros.

pub mod info;
pub mod leds;
pub mod zones;
