//! Queue snapshot routes.

use axum::{Json, Router, extract::State, routing::get};
use chrono::Utc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{CounterStatusResponse, QueueDataResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/queue-data", get(queue_data))
        .route("/counter-status", get(counter_status))
}

/// Latest snapshot with counter history, or 503 `NO_DATA_YET` on a cold start.
async fn queue_data(State(state): State<AppState>) -> ApiResult<Json<QueueDataResponse>> {
    let mut view = state.store.read();
    let connection = state.connection.read();

    let Some(snapshot) = view.snapshot.take() else {
        return Err(ApiError::no_data_yet().with_details(serde_json::json!({
            "mode": connection.mode,
            "consecutiveFailures": connection.consecutive_failures,
        })));
    };

    Ok(Json(QueueDataResponse::new(snapshot, view, &connection)))
}

async fn counter_status(State(state): State<AppState>) -> Json<CounterStatusResponse> {
    Json(CounterStatusResponse {
        success: true,
        counter_history: state.store.read().counter_history,
        timestamp: Utc::now(),
    })
}
