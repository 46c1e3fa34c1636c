// Health endpoint

use std::time::Duration;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use scribe_storage::{HealthStatus, ObservabilityStore};

/// App state
#[derive(Clone)]
pub struct AppState {
    pub observability: ObservabilityStore,
    pub heartbeat_interval: Duration,
}

/// Services whose liveness the health endpoint reports
const SERVICES: [&str; 2] = ["api", "worker"];

#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceHealth {
    pub service: String,
    #[schema(value_type = String)]
    pub status: HealthStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub services: Vec<ServiceHealth>,
}

/// Create health routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(state)
}

/// GET /health - liveness with per-service heartbeat verdicts
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health report", body = HealthResponse)),
    tag = "health"
)]
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut services = Vec::with_capacity(SERVICES.len());
    let mut degraded = false;

    for service in SERVICES {
        let status = state
            .observability
            .health(service, state.heartbeat_interval)
            .await
            .unwrap_or(HealthStatus::Degraded);
        degraded |= status == HealthStatus::Degraded;
        services.push(ServiceHealth {
            service: service.to_string(),
            status,
        });
    }

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        services,
    })
}
