//! Per-counter serving history.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Completed entries kept per counter.
pub const MAX_COMPLETED: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedEntry {
    pub queue_no: u32,
    pub completed_at: DateTime<Utc>,
}

/// What one counter is serving now and what it served last.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterHistory {
    pub current: Option<u32>,
    /// Most recent first, at most [`MAX_COMPLETED`] entries.
    pub completed: Vec<CompletedEntry>,
}

impl CounterHistory {
    /// Record that the counter now serves `queue_no`.
    ///
    /// When this replaces a different number, the previous one moves to the
    /// head of `completed`. Returns whether anything changed.
    pub fn observe(&mut self, queue_no: u32, at: DateTime<Utc>) -> bool {
        match self.current {
            Some(current) if current == queue_no => false,
            Some(previous) => {
                self.completed.insert(
                    0,
                    CompletedEntry {
                        queue_no: previous,
                        completed_at: at,
                    },
                );
                self.completed.truncate(MAX_COMPLETED);
                self.current = Some(queue_no);
                true
            }
            None => {
                self.current = Some(queue_no);
                true
            }
        }
    }

    pub fn completed_numbers(&self) -> Vec<u32> {
        self.completed.iter().map(|entry| entry.queue_no).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_current_is_noop() {
        let mut history = CounterHistory::default();
        let now = Utc::now();

        assert!(history.observe(4015, now));
        assert!(!history.observe(4015, now));
        assert!(history.observe(4016, now));

        assert_eq!(history.current, Some(4016));
        assert_eq!(history.completed_numbers(), vec![4015]);
        assert_eq!(history.completed[0].completed_at, now);
    }

    #[test]
    fn test_completed_capped_most_recent_first() {
        let mut history = CounterHistory::default();
        for queue_no in 100..110 {
            history.observe(queue_no, Utc::now());
            assert!(history.completed.len() <= MAX_COMPLETED);
        }
        assert_eq!(history.current, Some(109));
        assert_eq!(history.completed_numbers(), vec![108, 107, 106]);
    }

    #[test]
    fn test_going_back_counts_as_change() {
        let mut history = CounterHistory::default();
        history.observe(10, Utc::now());
        history.observe(11, Utc::now());
        history.observe(10, Utc::now());
        assert_eq!(history.completed_numbers(), vec![11, 10]);
    }
}
