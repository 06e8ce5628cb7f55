//! Connection health published by the controller.

use chrono::{DateTime, Utc};
use queue_source::{SnapshotSource, SourceError, StreamState};
use serde::Serialize;
use tokio::sync::watch;

/// Which acquisition mode is currently authorized to write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Streaming,
    Scraping,
    Simulated,
    /// Trying to (re)establish the stream.
    Reconnecting,
}

impl ConnectionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Scraping => "scraping",
            Self::Simulated => "simulated",
            Self::Reconnecting => "reconnecting",
        }
    }

    /// Whether a snapshot from `source` may be written while in this mode.
    ///
    /// While reconnecting only a manually requested scrape may write.
    pub fn accepts(&self, source: SnapshotSource) -> bool {
        matches!(
            (self, source),
            (Self::Streaming, SnapshotSource::Streaming)
                | (Self::Scraping | Self::Reconnecting, SnapshotSource::Scraped)
                | (Self::Simulated, SnapshotSource::Simulated)
        )
    }
}

impl std::fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub mode: ConnectionMode,
    /// Failed attempts since entering the current mode.
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    /// `network_failure`, `protocol_failure` or `decode_failure`.
    pub last_error_kind: Option<&'static str>,
    pub stream_state: StreamState,
    pub mode_since: DateTime<Utc>,
    /// Last snapshot accepted from a real upstream source.
    pub last_success_at: Option<DateTime<Utc>>,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        self.mode == ConnectionMode::Streaming
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::Reconnecting,
            consecutive_failures: 0,
            last_error: None,
            last_error_kind: None,
            stream_state: StreamState::Idle,
            mode_since: Utc::now(),
            last_success_at: None,
        }
    }
}

/// Write half of the connection state, owned by the controller.
#[derive(Debug)]
pub struct ConnectionTracker {
    tx: watch::Sender<ConnectionState>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionState::default());
        Self { tx }
    }

    pub fn reader(&self) -> ConnectionReader {
        ConnectionReader {
            rx: self.tx.subscribe(),
        }
    }

    pub fn snapshot(&self) -> ConnectionState {
        self.tx.borrow().clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.tx.borrow().mode
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.tx.borrow().consecutive_failures
    }

    /// Switch modes. Entering a different mode resets the failure count.
    pub fn set_mode(&self, mode: ConnectionMode) {
        self.tx.send_if_modified(|state| {
            if state.mode == mode {
                return false;
            }
            state.mode = mode;
            state.mode_since = Utc::now();
            state.consecutive_failures = 0;
            true
        });
    }

    pub fn set_stream_state(&self, stream_state: StreamState) {
        self.tx.send_if_modified(|state| {
            let changed = state.stream_state != stream_state;
            state.stream_state = stream_state;
            changed
        });
    }

    /// Count a failed attempt in the current mode. Returns the new count.
    pub fn record_failure(&self, error: &SourceError) -> u32 {
        let mut failures = 0;
        self.tx.send_modify(|state| {
            state.consecutive_failures = state.consecutive_failures.saturating_add(1);
            state.last_error = Some(error.to_string());
            state.last_error_kind = Some(error.kind().as_str());
            failures = state.consecutive_failures;
        });
        failures
    }

    /// Remember an error without counting it against the current mode.
    pub fn note_error(&self, error: &SourceError) {
        self.tx.send_modify(|state| {
            state.last_error = Some(error.to_string());
            state.last_error_kind = Some(error.kind().as_str());
        });
    }

    pub fn reset_failures(&self) {
        self.tx.send_if_modified(|state| {
            let changed = state.consecutive_failures != 0;
            state.consecutive_failures = 0;
            changed
        });
    }

    /// A real source delivered a snapshot.
    pub fn record_success(&self) {
        self.tx.send_modify(|state| {
            state.last_success_at = Some(Utc::now());
        });
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ConnectionReader {
    rx: watch::Receiver<ConnectionState>,
}

impl ConnectionReader {
    pub fn read(&self) -> ConnectionState {
        self.rx.borrow().clone()
    }

    pub fn mode(&self) -> ConnectionMode {
        self.rx.borrow().mode
    }

    /// Wait until the state satisfies `f`. Fails once the tracker is dropped.
    pub async fn wait_for(
        &mut self,
        f: impl FnMut(&ConnectionState) -> bool,
    ) -> Result<ConnectionState, watch::error::RecvError> {
        self.rx.wait_for(f).await.map(|state| (*state).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_starts_reconnecting() {
        let tracker = ConnectionTracker::new();
        let state = tracker.reader().read();
        assert_eq!(state.mode, ConnectionMode::Reconnecting);
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.stream_state, StreamState::Idle);
        assert!(!state.is_connected());
    }

    #[test]
    fn test_failures_reset_on_mode_change_only() {
        let tracker = ConnectionTracker::new();
        let err = SourceError::Timeout(Duration::from_secs(20));

        assert_eq!(tracker.record_failure(&err), 1);
        tracker.set_mode(ConnectionMode::Reconnecting);
        assert_eq!(tracker.record_failure(&err), 2);

        tracker.set_mode(ConnectionMode::Scraping);
        assert_eq!(tracker.consecutive_failures(), 0);

        let state = tracker.snapshot();
        assert_eq!(state.last_error_kind, Some("network_failure"));
        assert!(state.last_error.unwrap().contains("timed out"));
    }

    #[test]
    fn test_note_error_does_not_count() {
        let tracker = ConnectionTracker::new();
        tracker.note_error(&SourceError::NotFound);
        let state = tracker.snapshot();
        assert_eq!(state.consecutive_failures, 0);
        assert_eq!(state.last_error_kind, Some("protocol_failure"));
    }

    #[test]
    fn test_mode_accepts() {
        use SnapshotSource::*;
        assert!(ConnectionMode::Streaming.accepts(Streaming));
        assert!(!ConnectionMode::Streaming.accepts(Scraped));
        assert!(ConnectionMode::Scraping.accepts(Scraped));
        assert!(!ConnectionMode::Scraping.accepts(Simulated));
        assert!(ConnectionMode::Simulated.accepts(Simulated));
        assert!(!ConnectionMode::Simulated.accepts(Streaming));
        assert!(ConnectionMode::Reconnecting.accepts(Scraped));
        assert!(!ConnectionMode::Reconnecting.accepts(Streaming));
    }

    #[test]
    fn test_state_serialization() {
        let state = ConnectionState::default();
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["mode"], "reconnecting");
        assert_eq!(json["streamState"], "idle");
        assert_eq!(json["consecutiveFailures"], 0);
        assert!(json["lastError"].is_null());
    }
}
