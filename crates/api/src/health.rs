//! Health check endpoints.
//!
//! `/health` is a liveness probe that always answers; `/ready` validates
//! the database and cache before declaring the instance ready to receive
//! traffic. The richer authorization health verdict lives under
//! `/permissions/monitoring/health`.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use tracing::error;

use crate::state::AppState;

/// Liveness probe: the process is up and responding.
pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "authz-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness probe: dependencies answer before traffic is admitted.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = json!({});
    let mut ready = true;

    match state.db.check_health().await {
        Ok(_) => {
            checks["database"] = json!({ "status": "ok" });
        }
        Err(e) => {
            error!("Database readiness check failed: {}", e);
            checks["database"] = json!({ "status": "error", "error": e.to_string() });
            ready = false;
        }
    }

    match state.redis.check_health().await {
        Ok(_) => {
            checks["cache"] = json!({ "status": "ok" });
        }
        Err(e) => {
            error!("Cache readiness check failed: {}", e);
            checks["cache"] = json!({ "status": "error", "error": e.to_string() });
            ready = false;
        }
    }

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
}

/// Prometheus scrape endpoint.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.scrape()
}
