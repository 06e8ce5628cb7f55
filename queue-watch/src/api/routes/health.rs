//! Health check route.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::models::HealthResponse;
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Liveness plus whether any snapshot was ever produced. Always 200.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let view = state.store.read();
    let connection = state.connection.read();

    Json(HealthResponse {
        status: "healthy",
        uptime_secs: state.uptime_secs(),
        connected: connection.is_connected(),
        has_data: view.has_data(),
        data_source: view.snapshot.as_ref().map(|snapshot| snapshot.source),
        consecutive_failures: connection.consecutive_failures,
    })
}
