use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("http error: {0}")]
    HttpError(#[from] reqwest::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status {status}")]
    UnexpectedStatus { status: u16 },
    #[error("embedded queue document not found")]
    NotFound,
    #[error("decode error: {0}")]
    Decode(String),
    #[error("json error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("no data received within {0:?}")]
    Stalled(Duration),
    #[error("stream closed by upstream")]
    Closed,
}

/// Coarse failure taxonomy used for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Connection refused, reset, timed out, stalled or closed.
    Network,
    /// Unexpected status code or missing embedded document.
    Protocol,
    /// Payload present but not parseable into the expected shape.
    Decode,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network_failure",
            Self::Protocol => "protocol_failure",
            Self::Decode => "decode_failure",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SourceError {
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::HttpError(e) if e.is_decode() => FailureKind::Decode,
            Self::HttpError(e) if e.is_status() => FailureKind::Protocol,
            Self::HttpError(_) | Self::Timeout(_) | Self::Stalled(_) | Self::Closed => {
                FailureKind::Network
            }
            Self::InvalidUrl(_) | Self::UnexpectedStatus { .. } | Self::NotFound => {
                FailureKind::Protocol
            }
            Self::Decode(_) | Self::JsonError(_) => FailureKind::Decode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        assert_eq!(
            SourceError::Timeout(Duration::from_secs(1)).kind(),
            FailureKind::Network
        );
        assert_eq!(SourceError::Closed.kind(), FailureKind::Network);
        assert_eq!(
            SourceError::UnexpectedStatus { status: 502 }.kind(),
            FailureKind::Protocol
        );
        assert_eq!(SourceError::NotFound.kind(), FailureKind::Protocol);
        assert_eq!(SourceError::decode("bad").kind(), FailureKind::Decode);

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        assert_eq!(SourceError::from(json_err).kind(), FailureKind::Decode);
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(FailureKind::Network.to_string(), "network_failure");
        assert_eq!(FailureKind::Decode.as_str(), "decode_failure");
    }
}
