//! Handler for health check endpoint.

use axum::{Json, extract::State, http::StatusCode};

use crate::api::dto::health::{CheckStatus, HealthChecks, HealthResponse};
use crate::state::AppState;

/// Returns service health status with component checks.
///
/// # Endpoint
///
/// `GET /health`
///
/// # Response Codes
///
/// - **200 OK**: All components healthy
/// - **503 Service Unavailable**: One or more components degraded
///
/// # Components Checked
///
/// 1. **Database**: Round trip through the link repository
/// 2. **Cache**: Redis PING (always ok when caching is disabled)
/// 3. **Evaluation queue**: Open, with depth and in-flight jobs
/// 4. **Aggregators**: Number of live click aggregators
pub async fn health_handler(
    State(state): State<AppState>,
) -> Result<Json<HealthResponse>, (StatusCode, Json<HealthResponse>)> {
    let database = check_database(&state).await;
    let cache = check_cache(&state).await;
    let evaluation_queue = check_queue(&state);
    let aggregators = CheckStatus::ok(format!("Active: {}", state.aggregators.active_actors()));

    let all_healthy = database.is_ok() && cache.is_ok() && evaluation_queue.is_ok();

    let response = HealthResponse {
        status: if all_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        checks: HealthChecks {
            database,
            cache,
            evaluation_queue,
            aggregators,
        },
    };

    if all_healthy {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}

async fn check_database(state: &AppState) -> CheckStatus {
    match state.links.health_check().await {
        Ok(()) => CheckStatus::ok("Connected"),
        Err(e) => CheckStatus::error(format!("Database error: {}", e)),
    }
}

fn check_queue(state: &AppState) -> CheckStatus {
    if state.queue.is_closed() {
        CheckStatus::error("Evaluation queue is closed")
    } else {
        CheckStatus::ok(format!(
            "Depth: {}/{}, in flight: {}",
            state.queue.depth(),
            state.queue.capacity(),
            state.queue.in_flight()
        ))
    }
}

async fn check_cache(state: &AppState) -> CheckStatus {
    if state.cache.health_check().await {
        CheckStatus::ok("Cache reachable")
    } else {
        CheckStatus::error("Cache connection failed")
    }
}
