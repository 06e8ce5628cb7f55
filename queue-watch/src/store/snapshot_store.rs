use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use queue_source::QueueSnapshot;
use tokio::sync::watch;
use tracing::trace;

use super::history::CounterHistory;

/// Everything a reader can see at one instant.
#[derive(Debug, Clone, Default)]
pub struct StoreView {
    pub snapshot: Option<Arc<QueueSnapshot>>,
    /// Keyed by counter identifier.
    pub counter_history: BTreeMap<String, CounterHistory>,
    /// Accepted writes since start.
    pub writes: u64,
    pub last_write_at: Option<DateTime<Utc>>,
}

impl StoreView {
    /// Whether any snapshot was ever written. Stays true once set.
    pub fn has_data(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Write half of the store.
///
/// Not `Clone`: the single owner (the acquisition controller) is the only
/// writer. Readers get [`SnapshotReader`]s.
#[derive(Debug)]
pub struct SnapshotStore {
    tx: watch::Sender<StoreView>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(StoreView::default());
        Self { tx }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.tx.subscribe(),
        }
    }

    /// Replace the current snapshot and update its counter's history.
    ///
    /// Never fails and performs no validation.
    pub fn write(&self, candidate: QueueSnapshot) {
        self.tx.send_modify(|view| {
            if let (Some(counter), Some(current)) =
                (candidate.counter_no.as_ref(), candidate.current_queue)
            {
                let changed = view
                    .counter_history
                    .entry(counter.clone())
                    .or_default()
                    .observe(current, candidate.fetched_at);
                if changed {
                    trace!(counter = %counter, current, "Counter history updated");
                }
            }

            view.writes += 1;
            view.last_write_at = Some(Utc::now());
            view.snapshot = Some(Arc::new(candidate));
        });
    }

    pub fn read(&self) -> StoreView {
        self.tx.borrow().clone()
    }

    pub fn current(&self) -> Option<Arc<QueueSnapshot>> {
        self.tx.borrow().snapshot.clone()
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Read half of the store. Cheap to clone; reads never block on writers.
#[derive(Debug, Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<StoreView>,
}

impl SnapshotReader {
    pub fn read(&self) -> StoreView {
        self.rx.borrow().clone()
    }

    pub fn current(&self) -> Option<Arc<QueueSnapshot>> {
        self.rx.borrow().snapshot.clone()
    }

    pub fn has_data(&self) -> bool {
        self.rx.borrow().has_data()
    }

    /// Wait for the next write. Fails once the store is dropped.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.rx.changed().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use queue_source::{SnapshotSource, WaitingEntry};

    fn snapshot(current: Option<u32>, counter: Option<&str>, source: SnapshotSource) -> QueueSnapshot {
        QueueSnapshot {
            current_queue: current,
            counter_no: counter.map(str::to_string),
            waiting: vec![WaitingEntry::new(4016), WaitingEntry::new(4017)],
            fetched_at: Utc::now(),
            source,
        }
    }

    #[test]
    fn test_read_returns_written_snapshot() {
        let store = SnapshotStore::new();
        let reader = store.reader();
        assert!(!reader.has_data());

        let written = snapshot(Some(4015), Some("2"), SnapshotSource::Scraped);
        store.write(written.clone());

        let view = reader.read();
        assert_eq!(view.snapshot.as_deref(), Some(&written));
        assert_eq!(view.snapshot.unwrap().source, SnapshotSource::Scraped);
        assert_eq!(view.writes, 1);
        assert!(view.last_write_at.is_some());
    }

    #[test]
    fn test_writes_fully_replace() {
        let store = SnapshotStore::new();
        store.write(snapshot(Some(10), Some("1"), SnapshotSource::Streaming));
        store.write(snapshot(None, None, SnapshotSource::Simulated));

        let current = store.current().unwrap();
        assert_eq!(current.current_queue, None);
        assert_eq!(current.counter_no, None);
        assert_eq!(current.source, SnapshotSource::Simulated);
    }

    #[test]
    fn test_counter_history_scenario() {
        let store = SnapshotStore::new();
        for current in [4015, 4015, 4016] {
            store.write(snapshot(Some(current), Some("2"), SnapshotSource::Streaming));
        }

        let view = store.read();
        let history = &view.counter_history["2"];
        assert_eq!(history.current, Some(4016));
        assert_eq!(history.completed_numbers(), vec![4015]);
    }

    #[test]
    fn test_unknown_counter_or_current_skips_history() {
        let store = SnapshotStore::new();
        store.write(snapshot(Some(5), None, SnapshotSource::Scraped));
        store.write(snapshot(None, Some("3"), SnapshotSource::Scraped));
        assert!(store.read().counter_history.is_empty());
    }

    #[test]
    fn test_history_per_counter_is_bounded() {
        let store = SnapshotStore::new();
        for i in 0..50u32 {
            let counter = ["1", "2", "3"][(i % 3) as usize];
            store.write(snapshot(Some(100 + i), Some(counter), SnapshotSource::Simulated));
        }
        let view = store.read();
        assert_eq!(view.counter_history.len(), 3);
        assert!(view.counter_history.values().all(|h| h.completed.len() <= 3));
    }

    #[tokio::test]
    async fn test_reader_observes_changes() {
        let store = SnapshotStore::new();
        let mut reader = store.reader();

        store.write(snapshot(Some(1), Some("1"), SnapshotSource::Streaming));
        reader.changed().await.unwrap();
        assert!(reader.has_data());

        drop(store);
        assert!(reader.changed().await.is_err());
        assert!(reader.has_data());
    }
}
