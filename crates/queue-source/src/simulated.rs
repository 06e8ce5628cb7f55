//! Synthetic queue progress for when no real source is reachable.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{RngExt, SeedableRng};

use crate::snapshot::{QueueSnapshot, SnapshotSource, WaitingEntry};

const SERVICE_TYPE: &str = "general";

/// Minutes added to the waiting-time label per position in line.
const MINUTES_PER_POSITION: usize = 2;

#[derive(Debug, Clone)]
pub struct SimulatedFeedConfig {
    /// Number served when the feed starts.
    pub start_queue: u32,
    /// Length of the waiting list, held constant.
    pub lookahead: usize,
    /// Chance that a tick advances the queue.
    pub advance_probability: f64,
    /// Counters served in rotation.
    pub counters: Vec<String>,
    pub tick_interval: Duration,
    /// Fixed RNG seed; random when unset.
    pub seed: Option<u64>,
}

impl Default for SimulatedFeedConfig {
    fn default() -> Self {
        Self {
            start_queue: 2010,
            lookahead: 8,
            advance_probability: 0.6,
            counters: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            tick_interval: Duration::from_secs(30),
            seed: None,
        }
    }
}

/// A queue that advances by at most one position per tick.
///
/// `current` never decreases and the waiting list keeps its initial length:
/// every advance moves the head into `current` and appends `last + 1`.
#[derive(Debug)]
pub struct SimulatedFeed {
    current: u32,
    waiting: VecDeque<u32>,
    counters: Vec<String>,
    counter_idx: usize,
    advance_probability: f64,
    tick_interval: Duration,
    rng: StdRng,
}

impl SimulatedFeed {
    pub fn new(config: SimulatedFeedConfig) -> Self {
        let seed = config.seed.unwrap_or_else(rand::random);
        let waiting = (1..=config.lookahead as u32)
            .map(|offset| config.start_queue.saturating_add(offset))
            .collect();

        Self {
            current: config.start_queue,
            waiting,
            counters: config.counters,
            counter_idx: 0,
            advance_probability: config.advance_probability.clamp(0.0, 1.0),
            tick_interval: config.tick_interval,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    pub fn current(&self) -> u32 {
        self.current
    }

    /// Roll for one advance. Returns whether the queue moved.
    pub fn tick(&mut self) -> bool {
        if !self.rng.random_bool(self.advance_probability) {
            return false;
        }
        self.advance();
        true
    }

    fn advance(&mut self) {
        match self.waiting.pop_front() {
            Some(next) => {
                self.current = next;
                let tail = self.waiting.back().copied().unwrap_or(next);
                self.waiting.push_back(tail.saturating_add(1));
            }
            // Zero look-ahead: count up on our own.
            None => self.current = self.current.saturating_add(1),
        }

        if !self.counters.is_empty() {
            self.counter_idx = (self.counter_idx + 1) % self.counters.len();
        }
    }

    /// The feed's state as a `simulated` snapshot stamped now.
    pub fn snapshot(&self) -> QueueSnapshot {
        let waiting = self
            .waiting
            .iter()
            .enumerate()
            .map(|(idx, queue_no)| WaitingEntry {
                queue_no: *queue_no,
                customer_name: Some(format!("Customer {queue_no}")),
                service_type: Some(SERVICE_TYPE.to_string()),
                time_waiting: Some(format!("{} min", (idx + 1) * MINUTES_PER_POSITION)),
            })
            .collect();

        QueueSnapshot {
            current_queue: Some(self.current),
            counter_no: self.counters.get(self.counter_idx).cloned(),
            waiting,
            fetched_at: Utc::now(),
            source: SnapshotSource::Simulated,
        }
    }
}

impl Default for SimulatedFeed {
    fn default() -> Self {
        Self::new(SimulatedFeedConfig::default())
    }
}
