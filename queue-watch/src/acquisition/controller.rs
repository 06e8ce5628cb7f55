//! Failover between the push stream, page scraping and the simulated feed.
//!
//! The controller is one task running a phase state machine:
//!
//! ```text
//! Connect --ok--> Streaming --error/stall/close--> Backoff --> Connect
//!    |                                                 ^
//!    +--stream budget exhausted--> Scraping --scrape budget exhausted--> Simulated
//!                                     |                                      |
//!                                     +------ background probe ok -----------+--> Streaming
//! ```
//!
//! Each phase owns its timers and in-flight attempts. Leaving a phase drops
//! them, so nothing started under an old mode can write afterwards.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use queue_source::{
    QueuePage, QueueSnapshot, QueueStream, SimulatedFeed, SourceError, StreamSession, StreamState,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, Interval, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AcquisitionConfig;
use crate::error::{Error, Result};
use crate::store::{SnapshotReader, SnapshotStore};

use super::state::{ConnectionMode, ConnectionReader, ConnectionTracker};

const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Requests accepted by a running controller.
#[derive(Debug)]
pub enum ControllerCommand {
    /// Try the stream now, then one scrape.
    RetryConnection {
        reply: oneshot::Sender<RetryOutcome>,
    },
}

/// What a manual retry achieved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RetryOutcome {
    /// The stream was already open; nothing was done.
    AlreadyStreaming,
    Streaming,
    Scraped {
        stream_error: String,
    },
    Failed {
        stream_error: String,
        scrape_error: String,
    },
}

impl RetryOutcome {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Cloneable handle for talking to a running controller.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    tx: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    pub async fn retry_connection(&self) -> Result<RetryOutcome> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(ControllerCommand::RetryConnection { reply })
            .await
            .map_err(|_| Error::controller_unavailable("controller is not running"))?;
        rx.await
            .map_err(|_| Error::controller_unavailable("controller stopped before replying"))
    }
}

enum Phase {
    Connect,
    Backoff(Duration),
    Streaming(StreamSession),
    Scraping,
    Simulated,
    Stopped,
}

/// An optional attempt running alongside a phase's select loop.
///
/// `wait` never resolves while idle and is cancel safe: dropping it keeps the
/// attempt for the next call.
struct InFlight<T> {
    fut: Option<BoxFuture<'static, T>>,
}

impl<T> InFlight<T> {
    fn idle() -> Self {
        Self { fut: None }
    }

    fn is_idle(&self) -> bool {
        self.fut.is_none()
    }

    fn start(&mut self, fut: BoxFuture<'static, T>) {
        self.fut = Some(fut);
    }

    async fn wait(&mut self) -> T {
        let Some(fut) = self.fut.as_mut() else {
            return std::future::pending().await;
        };
        let output = fut.await;
        self.fut = None;
        output
    }
}

/// Sole writer of the snapshot store and the connection state.
pub struct FailoverController {
    stream: Arc<dyn QueueStream>,
    page: Arc<dyn QueuePage>,
    feed: SimulatedFeed,
    store: SnapshotStore,
    connection: ConnectionTracker,
    config: AcquisitionConfig,
    command_rx: mpsc::Receiver<ControllerCommand>,
    commands_open: bool,
    cancel_token: CancellationToken,
}

impl FailoverController {
    pub fn new(
        stream: Arc<dyn QueueStream>,
        page: Arc<dyn QueuePage>,
        config: AcquisitionConfig,
        cancel_token: CancellationToken,
    ) -> (Self, ControllerHandle) {
        let config = config.normalized();
        let (tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let controller = Self {
            stream,
            page,
            feed: SimulatedFeed::new(config.simulation.clone()),
            store: SnapshotStore::new(),
            connection: ConnectionTracker::new(),
            config,
            command_rx,
            commands_open: true,
            cancel_token,
        };

        (controller, ControllerHandle { tx })
    }

    pub fn store_reader(&self) -> SnapshotReader {
        self.store.reader()
    }

    pub fn connection_reader(&self) -> ConnectionReader {
        self.connection.reader()
    }

    /// Run until the cancellation token fires.
    pub async fn run(mut self) {
        info!(
            stream_retry_budget = self.config.stream_retry_budget,
            scrape_retry_budget = self.config.scrape_retry_budget,
            "Acquisition controller started"
        );

        let mut phase = Phase::Connect;
        loop {
            phase = match phase {
                Phase::Connect => self.connect().await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Streaming(session) => self.stream(session).await,
                Phase::Scraping => self.scrape().await,
                Phase::Simulated => self.simulate().await,
                Phase::Stopped => break,
            };
        }

        info!("Acquisition controller stopped");
    }

    async fn connect(&mut self) -> Phase {
        self.connection.set_mode(ConnectionMode::Reconnecting);
        self.connection.set_stream_state(StreamState::Connecting);
        debug!(
            attempt = self.connection.consecutive_failures() + 1,
            "Connecting to queue stream"
        );

        let mut attempt = self.connect_attempt();
        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return Phase::Stopped,

                cmd = self.command_rx.recv(), if self.commands_open => {
                    let Some(ControllerCommand::RetryConnection { reply }) = cmd else {
                        self.commands_open = false;
                        continue;
                    };
                    // The manual attempt replaces the automatic one, which is
                    // dropped uncounted and restarted if the retry fails.
                    return self.manual_retry(reply).await.unwrap_or(Phase::Connect);
                }

                result = &mut attempt => {
                    return match result {
                        Ok(session) => self.enter_streaming(session),
                        Err(error) => self.stream_failed(error, StreamState::Errored),
                    };
                }
            }
        }
    }

    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return Phase::Stopped,

                cmd = self.command_rx.recv(), if self.commands_open => {
                    if let Some(phase) = self.handle_command(cmd).await {
                        return phase;
                    }
                }

                _ = &mut sleep => return Phase::Connect,
            }
        }
    }

    async fn stream(&mut self, mut session: StreamSession) -> Phase {
        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => {
                    session.disconnect();
                    self.connection.set_stream_state(session.state());
                    return Phase::Stopped;
                }

                cmd = self.command_rx.recv(), if self.commands_open => match cmd {
                    Some(ControllerCommand::RetryConnection { reply }) => {
                        debug!("Manual retry requested while streaming");
                        let _ = reply.send(RetryOutcome::AlreadyStreaming);
                    }
                    None => self.commands_open = false,
                },

                result = session.next_snapshot() => match result {
                    Ok(snapshot) => {
                        self.accept(snapshot);
                    }
                    Err(error) => {
                        session.disconnect();
                        let stats = session.stats();
                        info!(
                            frames = stats.frames,
                            snapshots = stats.snapshots,
                            malformed = stats.malformed,
                            connected_at = %session.connected_at(),
                            "Queue stream session ended"
                        );
                        return self.stream_failed(error, session.state());
                    }
                },
            }
        }
    }

    async fn scrape(&mut self) -> Phase {
        info!(poll_interval = ?self.config.poll_interval, "Polling queue page");

        let mut poll = interval(self.config.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut probe_timer = self.probe_timer();
        let mut fetch = InFlight::idle();
        let mut probe = InFlight::idle();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return Phase::Stopped,

                cmd = self.command_rx.recv(), if self.commands_open => {
                    if let Some(phase) = self.handle_command(cmd).await {
                        return phase;
                    }
                }

                result = probe.wait() => match result {
                    Ok(session) => {
                        info!("Background probe reached the stream, leaving scraping");
                        return self.enter_streaming(session);
                    }
                    Err(error) => {
                        debug!(error = %error, "Background stream probe failed");
                        self.connection.note_error(&error);
                    }
                },

                result = fetch.wait() => match result {
                    Ok(snapshot) => {
                        self.connection.reset_failures();
                        self.accept(snapshot);
                    }
                    Err(error) => {
                        let failures = self.connection.record_failure(&error);
                        let budget = self.config.scrape_retry_budget;
                        if failures >= budget {
                            warn!(
                                failures,
                                budget,
                                error = %error,
                                "Scrape retry budget exhausted, switching to simulated data"
                            );
                            self.connection.set_mode(ConnectionMode::Simulated);
                            return Phase::Simulated;
                        }
                        warn!(failures, budget, error = %error, kind = %error.kind(), "Scrape failed");
                    }
                },

                _ = poll.tick() => {
                    if fetch.is_idle() {
                        fetch.start(self.fetch_attempt());
                    } else {
                        debug!("Previous scrape still running, skipping poll");
                    }
                }

                _ = probe_timer.tick() => {
                    if probe.is_idle() {
                        probe.start(self.connect_attempt());
                    }
                }
            }
        }
    }

    async fn simulate(&mut self) -> Phase {
        let period = self.feed.tick_interval();
        info!(tick_interval = ?period, "Serving simulated queue data");

        self.accept(self.feed.snapshot());

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut probe_timer = self.probe_timer();
        let mut probe = InFlight::idle();

        loop {
            tokio::select! {
                biased;

                _ = self.cancel_token.cancelled() => return Phase::Stopped,

                cmd = self.command_rx.recv(), if self.commands_open => {
                    if let Some(phase) = self.handle_command(cmd).await {
                        return phase;
                    }
                }

                result = probe.wait() => match result {
                    Ok(session) => {
                        info!("Background probe reached the stream, leaving simulation");
                        return self.enter_streaming(session);
                    }
                    Err(error) => {
                        let failures = self.connection.record_failure(&error);
                        debug!(failures, error = %error, "Background stream probe failed");
                    }
                },

                _ = ticker.tick() => {
                    if self.feed.tick() {
                        debug!(current = self.feed.current(), "Simulated queue advanced");
                    }
                    self.accept(self.feed.snapshot());
                }

                _ = probe_timer.tick() => {
                    if probe.is_idle() {
                        probe.start(self.connect_attempt());
                    }
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: Option<ControllerCommand>) -> Option<Phase> {
        match cmd {
            Some(ControllerCommand::RetryConnection { reply }) => self.manual_retry(reply).await,
            None => {
                self.commands_open = false;
                None
            }
        }
    }

    /// One stream attempt, then one scrape. Manual attempts do not count
    /// against the retry budgets.
    async fn manual_retry(&mut self, reply: oneshot::Sender<RetryOutcome>) -> Option<Phase> {
        let mode = self.connection.mode();
        info!(mode = %mode, "Manual reconnect requested");

        self.connection.set_stream_state(StreamState::Connecting);
        let stream_error = match self
            .cancel_token
            .run_until_cancelled(self.connect_attempt())
            .await
        {
            None => return Some(Phase::Stopped),
            Some(Ok(session)) => {
                let phase = self.enter_streaming(session);
                let _ = reply.send(RetryOutcome::Streaming);
                return Some(phase);
            }
            Some(Err(error)) => error,
        };

        self.connection.set_stream_state(StreamState::Errored);
        self.connection.note_error(&stream_error);
        debug!(error = %stream_error, "Manual stream attempt failed, trying one scrape");

        match self
            .cancel_token
            .run_until_cancelled(self.fetch_attempt())
            .await
        {
            None => Some(Phase::Stopped),
            Some(Ok(snapshot)) => {
                let next = match mode {
                    ConnectionMode::Simulated => {
                        info!("Manual scrape succeeded, leaving simulation");
                        self.connection.set_mode(ConnectionMode::Scraping);
                        Some(Phase::Scraping)
                    }
                    ConnectionMode::Scraping => {
                        self.connection.reset_failures();
                        None
                    }
                    _ => None,
                };
                self.accept(snapshot);
                let _ = reply.send(RetryOutcome::Scraped {
                    stream_error: stream_error.to_string(),
                });
                next
            }
            Some(Err(scrape_error)) => {
                self.connection.note_error(&scrape_error);
                warn!(
                    stream_error = %stream_error,
                    scrape_error = %scrape_error,
                    "Manual retry failed"
                );
                let _ = reply.send(RetryOutcome::Failed {
                    stream_error: stream_error.to_string(),
                    scrape_error: scrape_error.to_string(),
                });
                None
            }
        }
    }

    fn enter_streaming(&self, session: StreamSession) -> Phase {
        self.connection.set_mode(ConnectionMode::Streaming);
        self.connection.set_stream_state(StreamState::Open);
        info!("Queue stream open");
        Phase::Streaming(session)
    }

    fn stream_failed(&self, error: SourceError, state: StreamState) -> Phase {
        self.connection.set_mode(ConnectionMode::Reconnecting);
        self.connection.set_stream_state(state);

        let failures = self.connection.record_failure(&error);
        let budget = self.config.stream_retry_budget;
        if failures >= budget {
            warn!(
                failures,
                budget,
                error = %error,
                "Stream retry budget exhausted, switching to scraping"
            );
            self.connection.set_mode(ConnectionMode::Scraping);
            return Phase::Scraping;
        }

        let delay = self.config.backoff.delay_for_attempt(failures - 1);
        warn!(
            failures,
            budget,
            error = %error,
            kind = %error.kind(),
            retry_in = ?delay,
            "Queue stream failed"
        );
        Phase::Backoff(delay)
    }

    /// Write a snapshot if it belongs to the active mode.
    ///
    /// `fetched_at` is raised to the current snapshot's when the wall clock
    /// went backwards, keeping it non-decreasing without dropping data.
    fn accept(&self, mut snapshot: QueueSnapshot) -> bool {
        let mode = self.connection.mode();
        if !mode.accepts(snapshot.source) {
            debug!(mode = %mode, source = %snapshot.source, "Discarding snapshot from inactive source");
            return false;
        }

        if let Some(current) = self.store.current()
            && snapshot.fetched_at < current.fetched_at
        {
            debug!(
                fetched_at = %snapshot.fetched_at,
                current = %current.fetched_at,
                "Snapshot timestamp behind the current one, clamping"
            );
            snapshot.fetched_at = current.fetched_at;
        }

        if snapshot.source.is_upstream() {
            self.connection.record_success();
        }

        debug!(
            source = %snapshot.source,
            current = ?snapshot.current_queue,
            counter = ?snapshot.counter_no,
            waiting = snapshot.total_waiting(),
            "Snapshot accepted"
        );
        self.store.write(snapshot);
        true
    }

    fn connect_attempt(&self) -> BoxFuture<'static, queue_source::Result<StreamSession>> {
        let stream = Arc::clone(&self.stream);
        let limit = self.config.connect_timeout;
        async move {
            tokio::time::timeout(limit, stream.connect())
                .await
                .unwrap_or_else(|_| Err(SourceError::Timeout(limit)))
        }
        .boxed()
    }

    fn fetch_attempt(&self) -> BoxFuture<'static, queue_source::Result<QueueSnapshot>> {
        let page = Arc::clone(&self.page);
        let limit = self.config.scrape_timeout;
        async move {
            tokio::time::timeout(limit, page.fetch_once())
                .await
                .unwrap_or_else(|_| Err(SourceError::Timeout(limit)))
        }
        .boxed()
    }

    /// First tick one full period from now.
    fn probe_timer(&self) -> Interval {
        let period = self.config.probe_interval;
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    }
}
