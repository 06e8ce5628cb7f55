use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::{Client, StatusCode, header};
use tracing::{debug, info};
use url::Url;

use crate::error::{Result, SourceError};

use super::session::StreamSession;

/// Something that can open a queue push stream.
#[async_trait]
pub trait QueueStream: Send + Sync {
    /// Open the stream and return once the upstream has accepted it.
    async fn connect(&self) -> Result<StreamSession>;
}

/// SSE client for the upstream queue stream.
pub struct StreamClient {
    client: Client,
    stream_url: Url,
    connect_timeout: Duration,
    stall_window: Duration,
}

impl StreamClient {
    pub fn new(
        client: Client,
        stream_url: &str,
        connect_timeout: Duration,
        stall_window: Duration,
    ) -> Result<Self> {
        let stream_url = Url::parse(stream_url)
            .map_err(|e| SourceError::InvalidUrl(format!("{stream_url}: {e}")))?;
        Ok(Self {
            client,
            stream_url,
            connect_timeout,
            stall_window,
        })
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }
}

#[async_trait]
impl QueueStream for StreamClient {
    async fn connect(&self) -> Result<StreamSession> {
        debug!(url = %self.stream_url, "Connecting to queue stream");

        let request = self
            .client
            .get(self.stream_url.clone())
            .header(header::ACCEPT, "text/event-stream");

        let response = tokio::time::timeout(self.connect_timeout, request.send())
            .await
            .map_err(|_| SourceError::Timeout(self.connect_timeout))??;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SourceError::UnexpectedStatus {
                status: status.as_u16(),
            });
        }

        info!(
            url = %self.stream_url,
            content_type = ?response.headers().get(header::CONTENT_TYPE),
            "Queue stream connected"
        );

        let bytes = response.bytes_stream().map_err(SourceError::from);
        Ok(StreamSession::new(bytes, self.stall_window))
    }
}
