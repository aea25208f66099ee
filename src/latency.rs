//! Bounded latency window (spec.md §4.C).
//!
//! A thread-safe ring of `lb_handle_time` samples, capacity 1000, dropping
//! the oldest sample on overflow. `peek` and `drain` both run under the
//! window lock; mutation is O(1). Guarded by `parking_lot::Mutex`, matching
//! the short-critical-section convention the sibling `oj-daemon` package
//! uses for comparable bookkeeping state.

use std::collections::VecDeque;

use parking_lot::Mutex;

const CAPACITY: usize = 1000;

pub struct LatencyWindow {
    samples: Mutex<VecDeque<f64>>,
}

impl LatencyWindow {
    pub fn new() -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(CAPACITY)),
        }
    }

    /// Append a sample, dropping the oldest one if the ring is full.
    pub fn append(&self, seconds: f64) {
        let mut guard = self.samples.lock();
        if guard.len() == CAPACITY {
            guard.pop_front();
        }
        guard.push_back(seconds);
    }

    /// Return a copy of the current contents without clearing them.
    pub fn peek(&self) -> Vec<f64> {
        self.samples.lock().iter().copied().collect()
    }

    /// Return and empty the window atomically.
    pub fn drain(&self) -> Vec<f64> {
        let mut guard = self.samples.lock();
        guard.drain(..).collect()
    }

    /// Clear the window. Invariant I3: only the autoscaler calls this, and
    /// only after evaluating a sampling window.
    pub fn clear(&self) {
        self.samples.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new()
    }
}
