//! Upstream queue document decoding.
//!
//! Both the push stream and the HTML page carry the same document:
//!
//! ```json
//! {"currentQueue": {"queueNo": "4015", "counterNo": "2"},
//!  "queue": [{"queueNo": "4016", "customerName": "..."}]}
//! ```
//!
//! Queue numbers arrive as zero-padded strings or plain integers. Missing,
//! empty, zero or non-numeric values are treated as absent.

use chrono::Utc;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{Result, SourceError};
use crate::snapshot::{QueueSnapshot, SnapshotSource, WaitingEntry};

/// Raw document as sent by the upstream.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDocument {
    #[serde(default)]
    pub current_queue: Option<CurrentQueue>,
    #[serde(default)]
    pub queue: Option<Vec<QueueEntry>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentQueue {
    #[serde(default, deserialize_with = "lenient_queue_no")]
    pub queue_no: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub counter_no: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    #[serde(default, deserialize_with = "lenient_queue_no")]
    pub queue_no: Option<u32>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub customer_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub service_type: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub time_waiting: Option<String>,
}

impl QueueDocument {
    /// Normalize into a snapshot stamped with the current time.
    ///
    /// Waiting entries without a usable queue number are dropped.
    pub fn into_snapshot(self, source: SnapshotSource) -> QueueSnapshot {
        let (current_queue, counter_no) = match self.current_queue {
            Some(current) => (current.queue_no, current.counter_no),
            None => (None, None),
        };

        let waiting = self
            .queue
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| {
                Some(WaitingEntry {
                    queue_no: entry.queue_no?,
                    customer_name: entry.customer_name,
                    service_type: entry.service_type,
                    time_waiting: entry.time_waiting,
                })
            })
            .collect();

        QueueSnapshot {
            current_queue,
            counter_no,
            waiting,
            fetched_at: Utc::now(),
            source,
        }
    }
}

/// Decode a document from an already-parsed JSON value.
pub fn document_from_value(value: Value) -> Result<QueueDocument> {
    let Value::Object(map) = &value else {
        return Err(SourceError::decode("queue document is not a JSON object"));
    };

    if !map.contains_key("currentQueue") && !map.contains_key("queue") {
        return Err(SourceError::decode(
            "queue document has neither currentQueue nor queue",
        ));
    }

    QueueDocument::deserialize(value)
        .map_err(|e| SourceError::decode(format!("unexpected queue document shape: {e}")))
}

/// Decode a JSON text into a snapshot tagged with `source`.
pub fn decode_snapshot(text: &str, source: SnapshotSource) -> Result<QueueSnapshot> {
    let value: Value = serde_json::from_str(text.trim())?;
    Ok(document_from_value(value)?.into_snapshot(source))
}

/// Interpret a JSON value as a queue number.
pub fn queue_no_from_value(value: &Value) -> Option<u32> {
    let number = match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                None
            } else {
                s.parse::<u32>().ok()
            }
        }
        _ => None,
    };
    number.filter(|n| *n > 0)
}

fn lenient_queue_no<'de, D>(deserializer: D) -> std::result::Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(queue_no_from_value))
}

fn lenient_text<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
