//! Counter-to-rate derivation.
//!
//! [`RateTracker`] turns monotonically increasing counters (bytes sent, bytes
//! read, ...) into per-second rates, one independent state per key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

/// One reading of a cumulative counter.
#[derive(Debug, Clone, Copy)]
struct CounterSample {
    value: u64,
    observed_at: Instant,
}

/// Most recent sample and derived rate for one key.
#[derive(Debug, Default)]
struct RateState {
    sample: Option<CounterSample>,
    last_rate: Option<f64>,
}

/// Per-key rate derivation over cumulative counters.
///
/// The key map is guarded by a short-lived lock used only to look up or insert
/// the per-key slot; the per-key state has its own lock. Updates for one key
/// are strictly ordered while different keys never wait on each other.
#[derive(Debug, Default)]
pub struct RateTracker {
    states: Mutex<HashMap<String, Arc<Mutex<RateState>>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // State is overwritten as a whole; a poisoned guard still holds a
    // complete value.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl RateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `key` at `now` and return the per-second rate.
    ///
    /// - First observation of a key: `None`.
    /// - Non-positive elapsed time: the previously derived rate (if any).
    /// - Counter rollback (`value` below the previous sample): `Some(0.0)`.
    ///
    /// The stored sample is always replaced with the current one.
    pub fn rate(&self, key: &str, value: u64, now: Instant) -> Option<f64> {
        let slot = {
            let mut states = lock(&self.states);
            Arc::clone(states.entry(key.to_string()).or_default())
        };

        let mut state = lock(&slot);
        let rate = match state.sample {
            None => None,
            Some(previous) => {
                let elapsed = now
                    .checked_duration_since(previous.observed_at)
                    .map(|d| d.as_secs_f64())
                    .unwrap_or(0.0);
                if elapsed <= 0.0 {
                    state.last_rate
                } else if value < previous.value {
                    Some(0.0)
                } else {
                    Some((value - previous.value) as f64 / elapsed)
                }
            }
        };

        state.sample = Some(CounterSample {
            value,
            observed_at: now,
        });
        if rate.is_some() {
            state.last_rate = rate;
        }
        rate
    }

    /// Convenience for payload fields: whole units per second, 0 when no
    /// rate is available yet.
    pub fn whole_rate(&self, key: &str, value: u64, now: Instant) -> u64 {
        self.rate(key, value, now).map_or(0, |r| r as u64)
    }

    /// Number of keys observed so far.
    pub fn len(&self) -> usize {
        lock(&self.states).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
