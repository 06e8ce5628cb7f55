//! Upstream acquisition for the office queue display.
//!
//! The upstream exposes the same queue document two ways: a Server-Sent Events
//! push stream and an HTML page with the document embedded in a script
//! assignment. This crate decodes both into [`QueueSnapshot`]s and provides a
//! [`SimulatedFeed`] for when neither is reachable.

pub mod client;
pub mod error;
pub mod payload;
pub mod scrape;
pub mod simulated;
pub mod snapshot;
pub mod stream;

pub use error::{FailureKind, Result, SourceError};
pub use scrape::{QueuePage, ScrapeClient};
pub use simulated::{SimulatedFeed, SimulatedFeedConfig};
pub use snapshot::{QueueSnapshot, SnapshotSource, WaitingEntry};
pub use stream::{QueueStream, StreamClient, StreamSession, StreamState};
