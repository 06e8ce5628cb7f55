//! queue-watch: keeps the latest office queue state available.
//!
//! A single [`acquisition::FailoverController`] task pulls queue state from
//! the upstream push stream, falls back to scraping the rendered page, and
//! finally to a simulated feed. Results land in a [`store::SnapshotStore`]
//! that the read-only HTTP API serves.

pub mod acquisition;
pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod store;

pub use error::{Error, Result};
