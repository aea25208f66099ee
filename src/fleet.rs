//! Fleet registry and dispatch ring (spec.md §4.A).
//!
//! The authoritative, insertion-ordered table of live workers lives behind a
//! `parking_lot::Mutex<Vec<WorkerHandle>>` (mutated only by the supervisor).
//! The hot dispatch path never touches that mutex: `rebuild` snapshots the
//! ordered ports plus their per-worker counters into a `DispatchSnapshot` and
//! swaps it in atomically via `arc_swap::ArcSwap`, the same lock-free
//! read/copy-on-write pattern the teacher uses for `ArcSwap<MetricPicker>` in
//! `edge/core/service.rs`. `pick_next` loads one snapshot and works entirely
//! against it, so it can never observe a port removed *after* its call began
//! (invariant I2): the snapshot it reads was either built before or after the
//! removal, never mutated mid-read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::SupervisorError;

/// A live worker as seen by the fleet registry: a port and its dispatch
/// counter. The process handle itself is owned exclusively by the
/// supervisor (spec.md §9, "child processes as opaque handles").
#[derive(Clone)]
pub struct WorkerHandle {
    pub port: u16,
    pub request_count: Arc<AtomicU64>,
}

struct DispatchSnapshot {
    ports: Vec<u16>,
    counters: HashMap<u16, Arc<AtomicU64>>,
}

impl DispatchSnapshot {
    fn empty() -> Self {
        Self {
            ports: Vec::new(),
            counters: HashMap::new(),
        }
    }
}

pub struct Fleet {
    workers: Mutex<Vec<WorkerHandle>>,
    dispatch: ArcSwap<DispatchSnapshot>,
    cursor: AtomicUsize,
}

impl Fleet {
    pub fn new() -> Self {
        Self {
            workers: Mutex::new(Vec::new()),
            dispatch: ArcSwap::from_pointee(DispatchSnapshot::empty()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Register a new worker. Fails if `port` is already present (I1).
    /// Rebuilds the dispatch ring before returning.
    pub fn add(&self, port: u16) -> Result<(), SupervisorError> {
        {
            let mut workers = self.workers.lock();
            if workers.iter().any(|w| w.port == port) {
                return Err(SupervisorError::PortInUse(port));
            }
            workers.push(WorkerHandle {
                port,
                request_count: Arc::new(AtomicU64::new(0)),
            });
        }
        self.rebuild();
        Ok(())
    }

    /// Pop the last-added worker, if any, and rebuild the dispatch ring.
    /// Does not enforce `MIN_SERVICES`; that is the supervisor's job.
    pub fn remove_last(&self) -> Option<WorkerHandle> {
        let popped = {
            let mut workers = self.workers.lock();
            workers.pop()
        };
        if popped.is_some() {
            self.rebuild();
        }
        popped
    }

    pub fn contains(&self, port: u16) -> bool {
        self.workers.lock().iter().any(|w| w.port == port)
    }

    pub fn len(&self) -> usize {
        self.workers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ports in insertion order.
    pub fn snapshot(&self) -> Vec<u16> {
        self.workers.lock().iter().map(|w| w.port).collect()
    }

    /// Ports paired with their current dispatch counts, insertion order.
    pub fn entries(&self) -> Vec<(u16, u64)> {
        self.workers
            .lock()
            .iter()
            .map(|w| (w.port, w.request_count.load(Ordering::Relaxed)))
            .collect()
    }

    pub fn max_port(&self) -> Option<u16> {
        self.workers.lock().iter().map(|w| w.port).max()
    }

    pub fn total_requests(&self) -> u64 {
        self.workers
            .lock()
            .iter()
            .map(|w| w.request_count.load(Ordering::Relaxed))
            .sum()
    }

    /// Rebuild the dispatch ring from the current fleet. Restarts the
    /// cursor at position 0 — exact continuity of rotation across rebuilds
    /// is not required (spec.md §4.A: rebuilds are rare).
    pub fn rebuild(&self) {
        let snapshot = {
            let workers = self.workers.lock();
            let ports = workers.iter().map(|w| w.port).collect::<Vec<_>>();
            let counters = workers
                .iter()
                .map(|w| (w.port, w.request_count.clone()))
                .collect::<HashMap<_, _>>();
            DispatchSnapshot { ports, counters }
        };
        self.dispatch.store(Arc::new(snapshot));
        self.cursor.store(0, Ordering::SeqCst);
    }

    /// Pick the next port in round-robin order, incrementing its dispatch
    /// counter. `None` if the fleet is empty.
    pub fn pick_next(&self) -> Option<u16> {
        let snapshot = self.dispatch.load();
        if snapshot.ports.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % snapshot.ports.len();
        let port = snapshot.ports[idx];
        if let Some(counter) = snapshot.counters.get(&port) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Some(port)
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pick_next_fails_fast_on_empty_fleet() {
        let fleet = Fleet::new();
        assert_eq!(fleet.pick_next(), None);
    }

    #[test]
    fn add_rejects_duplicate_port() {
        let fleet = Fleet::new();
        fleet.add(9000).unwrap();
        assert!(matches!(
            fleet.add(9000),
            Err(SupervisorError::PortInUse(9000))
        ));
    }

    #[test]
    fn round_robin_cycles_in_insertion_order() {
        let fleet = Fleet::new();
        fleet.add(9000).unwrap();
        fleet.add(9001).unwrap();
        fleet.add(9002).unwrap();

        let picks: Vec<u16> = (0..6).map(|_| fleet.pick_next().unwrap()).collect();
        assert_eq!(picks, vec![9000, 9001, 9002, 9000, 9001, 9002]);
    }

    #[test]
    fn remove_last_pops_most_recently_added() {
        let fleet = Fleet::new();
        fleet.add(9000).unwrap();
        fleet.add(9001).unwrap();
        let removed = fleet.remove_last().unwrap();
        assert_eq!(removed.port, 9001);
        assert_eq!(fleet.snapshot(), vec![9000]);
    }

    #[test]
    fn dispatch_counts_balance_within_one() {
        let fleet = Fleet::new();
        for port in [9000, 9001, 9002] {
            fleet.add(port).unwrap();
        }
        for _ in 0..10 {
            fleet.pick_next();
        }
        let counts: Vec<u64> = fleet.entries().into_iter().map(|(_, c)| c).collect();
        let max = *counts.iter().max().unwrap();
        let min = *counts.iter().min().unwrap();
        assert!(max - min <= 1);
    }

    #[test]
    fn rebuild_is_idempotent_with_no_membership_change() {
        let fleet = Fleet::new();
        fleet.add(9000).unwrap();
        fleet.add(9001).unwrap();
        fleet.pick_next();
        fleet.rebuild();
        let first = fleet.pick_next();
        fleet.rebuild();
        let second_cycle: Vec<u16> = (0..2).map(|_| fleet.pick_next().unwrap()).collect();
        assert_eq!(first, Some(9000));
        assert_eq!(second_cycle, vec![9000, 9001]);
    }
}
