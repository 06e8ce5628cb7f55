//! Connection status and manual retry routes.

use axum::{Json, Router, extract::State, routing::get};

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{RetryConnectionResponse, StatusResponse};
use crate::api::server::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(status))
        .route(
            "/retry-connection",
            get(retry_connection).post(retry_connection),
        )
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let view = state.store.read();
    let connection = state.connection.read();

    Json(StatusResponse {
        mode: connection.mode,
        stream_state: connection.stream_state,
        connected: connection.is_connected(),
        consecutive_failures: connection.consecutive_failures,
        stream_retry_budget: state.stream_retry_budget,
        scrape_retry_budget: state.scrape_retry_budget,
        last_error: connection.last_error,
        last_error_kind: connection.last_error_kind,
        mode_since: connection.mode_since,
        last_success_at: connection.last_success_at,
        uptime_secs: state.uptime_secs(),
        has_data: view.has_data(),
        data_source: view.snapshot.as_ref().map(|snapshot| snapshot.source),
        snapshot_writes: view.writes,
        last_write_at: view.last_write_at,
        counters: view.counter_history.len(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Ask the controller for an immediate stream attempt, falling back to one
/// scrape. Waits for the outcome.
async fn retry_connection(
    State(state): State<AppState>,
) -> ApiResult<Json<RetryConnectionResponse>> {
    let Some(controller) = state.controller.as_ref() else {
        return Err(ApiError::service_unavailable(
            "Acquisition controller is not running",
        ));
    };

    let outcome = tokio::time::timeout(state.retry_timeout, controller.retry_connection())
        .await
        .map_err(|_| ApiError::gateway_timeout("Retry did not finish in time"))??;

    Ok(Json(RetryConnectionResponse::new(
        outcome,
        state.connection.mode(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use queue_source::{SourceError, StreamState};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::acquisition::{ConnectionMode, ConnectionTracker};
    use crate::store::SnapshotStore;

    async fn send(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_status_reports_connection_state() {
        let store = SnapshotStore::new();
        let tracker = ConnectionTracker::new();
        let state = AppState::new(store.reader(), tracker.reader()).with_budgets(5, 3);
        let app = router().with_state(state);

        tracker.set_stream_state(StreamState::Stalled);
        tracker.record_failure(&SourceError::Stalled(Duration::from_secs(30)));
        tracker.record_failure(&SourceError::Stalled(Duration::from_secs(30)));

        let (status, json) = send(app.clone(), "/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["mode"], "reconnecting");
        assert_eq!(json["streamState"], "stalled");
        assert_eq!(json["consecutiveFailures"], 2);
        assert_eq!(json["streamRetryBudget"], 5);
        assert_eq!(json["scrapeRetryBudget"], 3);
        assert_eq!(json["lastErrorKind"], "network_failure");
        assert_eq!(json["hasData"], false);
        assert!(json["uptimeSecs"].is_u64());

        tracker.set_mode(ConnectionMode::Scraping);
        let (_, json) = send(app, "/status").await;
        assert_eq!(json["mode"], "scraping");
        assert_eq!(json["consecutiveFailures"], 0);
    }

    #[tokio::test]
    async fn test_retry_without_controller() {
        let store = SnapshotStore::new();
        let tracker = ConnectionTracker::new();
        let app = router().with_state(AppState::new(store.reader(), tracker.reader()));

        let (status, json) = send(app, "/retry-connection").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
    }
}
