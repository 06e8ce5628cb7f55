//! API response bodies.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_source::{QueueSnapshot, SnapshotSource, StreamState};
use serde::Serialize;

use crate::acquisition::{ConnectionMode, ConnectionState, RetryOutcome};
use crate::store::{CounterHistory, StoreView};

/// Summary used by the dashboard's status banner.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub mode: ConnectionMode,
    pub using_mock_data: bool,
    pub fallback_mode: bool,
    pub last_update: DateTime<Utc>,
    pub connection_retries: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDataResponse {
    pub success: bool,
    pub snapshot: Arc<QueueSnapshot>,
    pub counter_history: BTreeMap<String, CounterHistory>,
    pub connected: bool,
    pub mode: ConnectionMode,
    pub timestamp: DateTime<Utc>,
    pub server_status: ServerStatus,
}

impl QueueDataResponse {
    pub fn new(snapshot: Arc<QueueSnapshot>, view: StoreView, connection: &ConnectionState) -> Self {
        let server_status = ServerStatus {
            mode: connection.mode,
            using_mock_data: snapshot.source == SnapshotSource::Simulated,
            fallback_mode: !connection.is_connected(),
            last_update: snapshot.fetched_at,
            connection_retries: connection.consecutive_failures,
        };

        Self {
            success: true,
            snapshot,
            counter_history: view.counter_history,
            connected: connection.is_connected(),
            mode: connection.mode,
            timestamp: Utc::now(),
            server_status,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterStatusResponse {
    pub success: bool,
    pub counter_history: BTreeMap<String, CounterHistory>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub mode: ConnectionMode,
    pub stream_state: StreamState,
    pub connected: bool,
    pub consecutive_failures: u32,
    pub stream_retry_budget: u32,
    pub scrape_retry_budget: u32,
    pub last_error: Option<String>,
    pub last_error_kind: Option<&'static str>,
    pub mode_since: DateTime<Utc>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub has_data: bool,
    pub data_source: Option<SnapshotSource>,
    pub snapshot_writes: u64,
    pub last_write_at: Option<DateTime<Utc>>,
    pub counters: usize,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Always `healthy` when the process answers.
    pub status: &'static str,
    pub uptime_secs: u64,
    pub connected: bool,
    pub has_data: bool,
    pub data_source: Option<SnapshotSource>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConnectionResponse {
    pub success: bool,
    /// `streaming`, `scraped` or `failed`.
    pub result: &'static str,
    pub message: String,
    pub mode: ConnectionMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scrape_error: Option<String>,
}

impl RetryConnectionResponse {
    pub fn new(outcome: RetryOutcome, mode: ConnectionMode) -> Self {
        let success = outcome.succeeded();
        let (result, message, stream_error, scrape_error) = match outcome {
            RetryOutcome::AlreadyStreaming => (
                "streaming",
                "Stream already connected".to_string(),
                None,
                None,
            ),
            RetryOutcome::Streaming => ("streaming", "Stream reconnected".to_string(), None, None),
            RetryOutcome::Scraped { stream_error } => (
                "scraped",
                "Stream unavailable, queue page scraped".to_string(),
                Some(stream_error),
                None,
            ),
            RetryOutcome::Failed {
                stream_error,
                scrape_error,
            } => (
                "failed",
                "Stream and queue page both unavailable".to_string(),
                Some(stream_error),
                Some(scrape_error),
            ),
        };

        Self {
            success,
            result,
            message,
            mode,
            stream_error,
            scrape_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_source::WaitingEntry;

    #[test]
    fn test_queue_data_serialization() {
        let snapshot = Arc::new(QueueSnapshot {
            current_queue: Some(2010),
            counter_no: Some("1".to_string()),
            waiting: vec![WaitingEntry::new(2011)],
            fetched_at: Utc::now(),
            source: SnapshotSource::Simulated,
        });
        let connection = ConnectionState {
            mode: ConnectionMode::Simulated,
            consecutive_failures: 2,
            ..Default::default()
        };

        let response = QueueDataResponse::new(snapshot, StoreView::default(), &connection);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["success"], true);
        assert_eq!(json["connected"], false);
        assert_eq!(json["mode"], "simulated");
        assert_eq!(json["snapshot"]["source"], "simulated");
        assert_eq!(json["serverStatus"]["usingMockData"], true);
        assert_eq!(json["serverStatus"]["fallbackMode"], true);
        assert_eq!(json["serverStatus"]["connectionRetries"], 2);
        assert!(json["counterHistory"].is_object());
    }

    #[test]
    fn test_retry_response() {
        let response = RetryConnectionResponse::new(
            RetryOutcome::Failed {
                stream_error: "timed out".to_string(),
                scrape_error: "embedded queue document not found".to_string(),
            },
            ConnectionMode::Simulated,
        );
        assert!(!response.success);
        assert_eq!(response.result, "failed");

        let json = serde_json::to_value(
            RetryConnectionResponse::new(RetryOutcome::AlreadyStreaming, ConnectionMode::Streaming),
        )
        .unwrap();
        assert_eq!(json["result"], "streaming");
        assert!(json.get("streamError").is_none());
    }
}
