//! End-to-end acquisition against a local upstream serving the push stream
//! and the rendered queue page over real HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::StreamExt;
use queue_source::SnapshotSource;
use queue_watch::acquisition::{
    BackoffPolicy, ConnectionMode, ConnectionReader, FailoverController, build_upstream,
};
use queue_watch::config::AcquisitionConfig;
use queue_watch::store::SnapshotReader;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const PAGE: &str = r#"<html><body><div id="queue"></div>
<script type="text/javascript">
    var queueOnlineDataFirst = '{&quot;currentQueue&quot;:{&quot;queueNo&quot;:&quot;4015&quot;,&quot;counterNo&quot;:&quot;2&quot;},&quot;queue&quot;:[{&quot;queueNo&quot;:&quot;4016&quot;},{&quot;queueNo&quot;:&quot;4017&quot;}]}';
</script></body></html>"#;

const STREAM_EVENT: &str = "event: message\ndata: {\"manageListQueue\":\"{\\\"currentQueue\\\":{\\\"queueNo\\\":\\\"4020\\\",\\\"counterNo\\\":\\\"1\\\"},\\\"queue\\\":[{\\\"queueNo\\\":\\\"4021\\\"}]}\"}\n\n";

/// Switches for the fake upstream.
#[derive(Clone, Default)]
struct Upstream {
    stream_up: Arc<AtomicBool>,
    page_up: Arc<AtomicBool>,
}

async fn stream_handler(State(upstream): State<Upstream>) -> Response {
    if !upstream.stream_up.load(Ordering::SeqCst) {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    let events = futures::stream::iter([
        Ok::<_, std::io::Error>(Bytes::from_static(b": connected\n\n")),
        Ok(Bytes::from_static(STREAM_EVENT.as_bytes())),
    ])
    .chain(futures::stream::pending());

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

async fn page_handler(State(upstream): State<Upstream>) -> Response {
    if !upstream.page_up.load(Ordering::SeqCst) {
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    Html(PAGE).into_response()
}

async fn spawn_upstream(upstream: Upstream) -> SocketAddr {
    let app = Router::new()
        .route("/queue_stream/294", get(stream_handler))
        .route("/queue/294", get(page_handler))
        .with_state(upstream);

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind upstream");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn config_for(addr: SocketAddr) -> AcquisitionConfig {
    AcquisitionConfig {
        stream_url: format!("http://{addr}/queue_stream/294"),
        page_url: format!("http://{addr}/queue/294"),
        stream_retry_budget: 2,
        scrape_retry_budget: 2,
        backoff: BackoffPolicy::constant(Duration::from_millis(50)),
        connect_timeout: Duration::from_secs(5),
        stall_window: Duration::from_secs(30),
        scrape_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(200),
        probe_interval: Duration::from_millis(300),
        ..Default::default()
    }
}

struct Running {
    store: SnapshotReader,
    connection: ConnectionReader,
    cancel: CancellationToken,
    task: tokio::task::JoinHandle<()>,
}

fn start(config: AcquisitionConfig) -> Running {
    let (stream, page) = build_upstream(&config).expect("Failed to build upstream clients");
    let cancel = CancellationToken::new();
    let (controller, _handle) = FailoverController::new(stream, page, config, cancel.clone());

    Running {
        store: controller.store_reader(),
        connection: controller.connection_reader(),
        cancel,
        task: tokio::spawn(controller.run()),
    }
}

impl Running {
    async fn wait_for_mode(&mut self, mode: ConnectionMode) {
        tokio::time::timeout(
            Duration::from_secs(10),
            self.connection.wait_for(|state| state.mode == mode),
        )
        .await
        .unwrap_or_else(|_| panic!("never reached {mode}"))
        .expect("controller stopped");
    }

    async fn wait_for_source(&self, source: SnapshotSource) {
        let mut store = self.store.clone();
        tokio::time::timeout(Duration::from_secs(10), async move {
            while store.current().map(|s| s.source) != Some(source) {
                store.changed().await.expect("store dropped");
            }
        })
        .await
        .unwrap_or_else(|_| panic!("no {source} snapshot written"));
    }

    async fn stop(self) {
        self.cancel.cancel();
        self.task.await.expect("controller panicked");
    }
}

#[tokio::test]
async fn test_streams_from_live_upstream() {
    let upstream = Upstream::default();
    upstream.stream_up.store(true, Ordering::SeqCst);
    let addr = spawn_upstream(upstream).await;

    let mut running = start(config_for(addr));
    running.wait_for_mode(ConnectionMode::Streaming).await;
    running.wait_for_source(SnapshotSource::Streaming).await;

    let snapshot = running.store.current().unwrap();
    assert_eq!(snapshot.current_queue, Some(4020));
    assert_eq!(snapshot.counter_no.as_deref(), Some("1"));
    assert_eq!(snapshot.waiting_numbers().collect::<Vec<_>>(), vec![4021]);

    running.stop().await;
}

#[tokio::test]
async fn test_scrapes_then_returns_to_stream() {
    let upstream = Upstream::default();
    upstream.page_up.store(true, Ordering::SeqCst);
    let addr = spawn_upstream(upstream.clone()).await;

    let mut running = start(config_for(addr));
    running.wait_for_mode(ConnectionMode::Scraping).await;
    running.wait_for_source(SnapshotSource::Scraped).await;

    let snapshot = running.store.current().unwrap();
    assert_eq!(snapshot.current_queue, Some(4015));
    assert_eq!(snapshot.waiting_numbers().collect::<Vec<_>>(), vec![4016, 4017]);
    assert_eq!(
        running.connection.read().last_error_kind,
        Some("protocol_failure")
    );

    upstream.stream_up.store(true, Ordering::SeqCst);
    running.wait_for_mode(ConnectionMode::Streaming).await;
    running.wait_for_source(SnapshotSource::Streaming).await;

    let view = running.store.read();
    assert_eq!(view.counter_history["2"].current, Some(4015));
    assert_eq!(view.counter_history["1"].current, Some(4020));

    running.stop().await;
}

#[tokio::test]
async fn test_simulates_when_upstream_is_down() {
    let addr = spawn_upstream(Upstream::default()).await;

    let mut running = start(config_for(addr));
    running.wait_for_mode(ConnectionMode::Simulated).await;
    running.wait_for_source(SnapshotSource::Simulated).await;

    let state = running.connection.read();
    assert!(!state.is_connected());
    assert!(running.store.has_data());

    running.stop().await;
}
