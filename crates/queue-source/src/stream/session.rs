//! An open push-stream connection.

use std::collections::VecDeque;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{Result, SourceError};
use crate::snapshot::QueueSnapshot;

use super::frame::{Frame, FrameDecoder, decode_frame};

/// Characters of a malformed frame included in the warning log.
const FRAME_PREVIEW_CHARS: usize = 200;

/// Position in the stream connection lifecycle.
///
/// `Idle -> Connecting -> Open -> (Stalled | Closed | Errored)`. Only `Open`
/// yields snapshots; every terminal state needs a fresh connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    #[default]
    Idle,
    Connecting,
    Open,
    Stalled,
    Closed,
    Errored,
}

impl StreamState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Stalled => "stalled",
            Self::Closed => "closed",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for StreamState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-session counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub frames: u64,
    pub snapshots: u64,
    pub malformed: u64,
}

pub type ByteStream = BoxStream<'static, Result<Bytes>>;

pub struct StreamSession {
    stream: Option<ByteStream>,
    decoder: FrameDecoder,
    pending: VecDeque<Frame>,
    stall_window: Duration,
    last_activity: Instant,
    state: StreamState,
    stats: SessionStats,
    connected_at: DateTime<Utc>,
}

impl StreamSession {
    /// Wrap an already accepted byte stream. The session starts `Open`.
    pub fn new<S>(stream: S, stall_window: Duration) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            stream: Some(stream.boxed()),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            stall_window,
            last_activity: Instant::now(),
            state: StreamState::Open,
            stats: SessionStats::default(),
            connected_at: Utc::now(),
        }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Wait for the next valid snapshot.
    ///
    /// Malformed frames are logged and skipped. Returns an error once the
    /// connection stalls, closes or fails; the session is torn down by then.
    ///
    /// Cancel safe: buffered bytes and decoded frames survive a dropped call,
    /// and the stall deadline is measured from the last received chunk.
    pub async fn next_snapshot(&mut self) -> Result<QueueSnapshot> {
        loop {
            if self.state != StreamState::Open {
                return Err(SourceError::Closed);
            }

            while let Some(frame) = self.pending.pop_front() {
                self.stats.frames += 1;
                match decode_frame(&frame) {
                    Ok(Some(snapshot)) => {
                        self.stats.snapshots += 1;
                        return Ok(snapshot);
                    }
                    Ok(None) => {
                        trace!(event = ?frame.event, "Ignoring stream event without queue data");
                    }
                    Err(e) => {
                        self.stats.malformed += 1;
                        warn!(
                            error = %e,
                            data = %frame.data.chars().take(FRAME_PREVIEW_CHARS).collect::<String>(),
                            "Skipping malformed stream frame"
                        );
                    }
                }
            }

            let Some(stream) = self.stream.as_mut() else {
                return Err(SourceError::Closed);
            };

            let deadline = self.last_activity + self.stall_window;
            match tokio::time::timeout_at(deadline, stream.next()).await {
                Err(_) => {
                    self.teardown(StreamState::Stalled);
                    return Err(SourceError::Stalled(self.stall_window));
                }
                Ok(None) => {
                    self.teardown(StreamState::Closed);
                    return Err(SourceError::Closed);
                }
                Ok(Some(Err(e))) => {
                    self.teardown(StreamState::Errored);
                    return Err(e);
                }
                Ok(Some(Ok(chunk))) => {
                    self.last_activity = Instant::now();
                    let frames = self.decoder.push(&chunk);
                    self.pending.extend(frames);
                }
            }
        }
    }

    /// Drop the connection. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        self.teardown(StreamState::Closed);
    }

    fn teardown(&mut self, state: StreamState) {
        if self.stream.take().is_some() {
            debug!(
                state = %state,
                frames = self.stats.frames,
                snapshots = self.stats.snapshots,
                malformed = self.stats.malformed,
                "Stream session torn down"
            );
        }
        self.pending.clear();
        if self.state == StreamState::Open {
            self.state = state;
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
