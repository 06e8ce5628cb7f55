//! In-memory holder of the latest queue snapshot and counter history.

pub mod history;
mod snapshot_store;

pub use history::{CompletedEntry, CounterHistory, MAX_COMPLETED};
pub use snapshot_store::{SnapshotReader, SnapshotStore, StoreView};
