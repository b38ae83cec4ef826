//! Health, liveness, and readiness endpoint handlers.
//!
//! These handlers expose process health for orchestrators (Kubernetes,
//! load balancers). Cluster health lives in the status feed.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Returns detailed health information as JSON.
///
/// Always returns 200 -- the `state` field in the response body indicates
/// whether the server is actually healthy. This lets monitoring tools
/// distinguish between "server is up but draining" vs "server is down".
pub async fn health_handler(
    State(state): State<AppState>,
) -> Json<serde_json::Value> {
    let health = state.shutdown.health_state();
    let in_flight = state.shutdown.in_flight_count();
    let uptime_secs = state.start_time.elapsed().as_secs();

    Json(json!({
        "state": health.as_str(),
        "product_name": state.topom.config().product_name,
        "version": state.topom.version(),
        "closed": state.topom.is_closed(),
        "in_flight": in_flight,
        "uptime_secs": uptime_secs,
    }))
}

/// Liveness check: 200 while the process answers at all. Health state and
/// the store are left to the readiness check.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness check: 200 when ready, 503 otherwise.
///
/// Returns 503 during startup, while draining, after stop, and once the
/// topology has been closed to mutations.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready && !state.topom.is_closed() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
