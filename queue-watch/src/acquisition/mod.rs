//! Queue state acquisition: failover between the upstream sources.

pub mod backoff;
pub mod controller;
pub mod state;

use std::sync::Arc;

use queue_source::client::{ClientOptions, build_client};
use queue_source::{QueuePage, QueueStream, ScrapeClient, StreamClient};
use tracing::info;

use crate::config::AcquisitionConfig;
use crate::error::Result;

pub use backoff::BackoffPolicy;
pub use controller::{ControllerCommand, ControllerHandle, FailoverController, RetryOutcome};
pub use state::{ConnectionMode, ConnectionReader, ConnectionState, ConnectionTracker};

/// Build the real upstream clients sharing one HTTP connection pool.
pub fn build_upstream(
    config: &AcquisitionConfig,
) -> Result<(Arc<dyn QueueStream>, Arc<dyn QueuePage>)> {
    let client = build_client(&ClientOptions {
        connect_timeout: config.connect_timeout,
        accept_invalid_certs: config.accept_invalid_certs,
    })?;

    let stream = StreamClient::new(
        client.clone(),
        &config.stream_url,
        config.connect_timeout,
        config.stall_window,
    )?;
    let page = ScrapeClient::new(client, &config.page_url, config.scrape_timeout)?;

    info!(
        stream_url = %stream.stream_url(),
        page_url = %page.page_url(),
        accept_invalid_certs = config.accept_invalid_certs,
        "Upstream clients ready"
    );

    Ok((Arc::new(stream), Arc::new(page)))
}
