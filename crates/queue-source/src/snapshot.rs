//! Normalized queue state shared by every acquisition mode.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which acquisition mode produced a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotSource {
    Streaming,
    Scraped,
    Simulated,
}

impl SnapshotSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Scraped => "scraped",
            Self::Simulated => "simulated",
        }
    }

    /// Whether the snapshot came from the real upstream.
    pub fn is_upstream(&self) -> bool {
        !matches!(self, Self::Simulated)
    }
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An upcoming queue entry, front-to-back in serving order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingEntry {
    pub queue_no: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_waiting: Option<String>,
}

impl WaitingEntry {
    pub fn new(queue_no: u32) -> Self {
        Self {
            queue_no,
            customer_name: None,
            service_type: None,
            time_waiting: None,
        }
    }
}

/// The most recently known state of the queue.
///
/// `current_queue` and `counter_no` are `None` when the upstream did not
/// report them; a reported `0` is treated the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSnapshot {
    pub current_queue: Option<u32>,
    pub counter_no: Option<String>,
    pub waiting: Vec<WaitingEntry>,
    pub fetched_at: DateTime<Utc>,
    pub source: SnapshotSource,
}

impl QueueSnapshot {
    pub fn total_waiting(&self) -> usize {
        self.waiting.len()
    }

    /// Queue numbers of the waiting list, front first.
    pub fn waiting_numbers(&self) -> impl Iterator<Item = u32> + '_ {
        self.waiting.iter().map(|entry| entry.queue_no)
    }
}
