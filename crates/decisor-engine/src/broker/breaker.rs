//! Circuit breaker table, partitioned by (workspace, tool).
//!
//! State machine: `closed` → `open` on 5 consecutive failures or ≥ 50%
//! failures over the last 20 calls; `open` → `half_open` after the cool-down;
//! `half_open` admits exactly one probe, closing on success and re-opening on
//! failure. Counters only feed statistical thresholds, so per-key mutual
//! exclusion is enough and occasional lost updates are acceptable.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Consecutive-failure trip threshold.
pub const TRIP_CONSECUTIVE: u32 = 5;
/// Rolling window length for the ratio threshold.
pub const WINDOW_LEN: usize = 20;
/// Failure ratio over a full window that trips the breaker.
pub const TRIP_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

struct Entry {
    state: CircuitState,
    consecutive_failures: u32,
    /// Rolling outcome window, `true` = success.
    window: VecDeque<bool>,
    opened_at: Instant,
    probe_in_flight: bool,
}

impl Entry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            window: VecDeque::with_capacity(WINDOW_LEN),
            opened_at: Instant::now(),
            probe_in_flight: false,
        }
    }

    fn push_outcome(&mut self, ok: bool) {
        self.window.push_back(ok);
        if self.window.len() > WINDOW_LEN {
            self.window.pop_front();
        }
    }

    fn window_tripped(&self) -> bool {
        if self.window.len() < WINDOW_LEN {
            return false;
        }
        let failures = self.window.iter().filter(|ok| !**ok).count();
        failures as f64 / self.window.len() as f64 >= TRIP_RATIO
    }

    /// Re-evaluate both trip conditions after an outcome lands. Runs on
    /// success pushes too: a success can be the call that completes a
    /// window already past the failure ratio.
    fn trip_if_over_threshold(&mut self) {
        if self.consecutive_failures >= TRIP_CONSECUTIVE || self.window_tripped() {
            self.state = CircuitState::Open;
            self.opened_at = Instant::now();
        }
    }
}

/// Process-wide breaker table. Rebuilt empty on every start; the state is
/// derived from live traffic and must never be persisted.
pub struct CircuitBreakerTable {
    cooldown: Duration,
    entries: Mutex<HashMap<(String, String), Entry>>,
}

impl CircuitBreakerTable {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether a call to (workspace, tool) may start now.
    pub fn admit(&self, workspace_id: &str, tool: &str) -> Admission {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((workspace_id.to_string(), tool.to_string()))
            .or_insert_with(Entry::new);
        match entry.state {
            CircuitState::Closed => Admission::Allow,
            CircuitState::Open => {
                if entry.opened_at.elapsed() >= self.cooldown {
                    entry.state = CircuitState::HalfOpen;
                    entry.probe_in_flight = true;
                    Admission::Allow
                } else {
                    Admission::Deny
                }
            }
            CircuitState::HalfOpen => {
                if entry.probe_in_flight {
                    Admission::Deny
                } else {
                    entry.probe_in_flight = true;
                    Admission::Allow
                }
            }
        }
    }

    pub fn record_success(&self, workspace_id: &str, tool: &str) {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(&(workspace_id.to_string(), tool.to_string())) else {
            return;
        };
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Closed;
                entry.consecutive_failures = 0;
                entry.window.clear();
                entry.probe_in_flight = false;
            }
            _ => {
                entry.consecutive_failures = 0;
                entry.push_outcome(true);
                // A success can still complete a window whose failure ratio
                // is over the threshold.
                entry.trip_if_over_threshold();
            }
        }
    }

    pub fn record_failure(&self, workspace_id: &str, tool: &str) {
        let mut entries = self.entries.lock();
        let entry = entries
            .entry((workspace_id.to_string(), tool.to_string()))
            .or_insert_with(Entry::new);
        match entry.state {
            CircuitState::HalfOpen => {
                entry.state = CircuitState::Open;
                entry.opened_at = Instant::now();
                entry.probe_in_flight = false;
            }
            _ => {
                entry.consecutive_failures += 1;
                entry.push_outcome(false);
                entry.trip_if_over_threshold();
            }
        }
    }

    /// Current state, defaulting to closed for unseen keys.
    pub fn state(&self, workspace_id: &str, tool: &str) -> CircuitState {
        self.entries
            .lock()
            .get(&(workspace_id.to_string(), tool.to_string()))
            .map(|e| e.state)
            .unwrap_or(CircuitState::Closed)
    }
}
