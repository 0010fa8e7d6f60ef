//! Health endpoint.
//!
//! - `GET /health` - Liveness plus a little process state
//!
//! The site itself is static, so there is no readiness dependency to probe.

use axum::Json;
use axum::extract::State;
use chrono::Utc;

use crate::logging::LogFields;
use crate::middleware::RequestScope;
use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "rate_limit_keys": 42,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
pub async fn health_check(
    State(state): State<AppState>,
    scope: RequestScope,
) -> Json<HealthResponse> {
    let rate_limit_keys = state.limiter.len();

    scope.logger().debug(
        "Health check",
        LogFields::new().with("rate_limit_keys", rate_limit_keys),
    );

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit_keys,
        timestamp: Utc::now(),
    })
}
