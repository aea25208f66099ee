//! Stats history and the read-only aggregator snapshot (spec.md §4.G).
//!
//! `StatsHistory` is written once per autoscaler tick and read by the
//! aggregator. The aggregator itself runs on its own timer, probes the
//! per-PID resource sensor via `sysinfo` (grounded in
//! `candle::pool::core::memory_governor`'s `System::new_all()` +
//! `refresh_*` pattern), and publishes an immutable [`StatsSnapshot`] behind
//! an `arc_swap::ArcSwap` for the `/stats` endpoint to read lock-free.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::fleet::Fleet;
use crate::latency::LatencyWindow;
use crate::supervisor::Supervisor;

const HISTORY_CAPACITY: usize = 1000;
const HISTORY_WINDOW: usize = 70;

#[derive(Debug, Clone)]
pub struct StatsHistoryEntry {
    pub t: SystemTime,
    pub mean_latency: f64,
    pub rps: f64,
    pub active_services: usize,
    pub total_responses: u64,
}

pub struct StatsHistory {
    entries: Mutex<VecDeque<StatsHistoryEntry>>,
}

impl StatsHistory {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(HISTORY_CAPACITY)),
        }
    }

    pub fn push(&self, entry: StatsHistoryEntry) {
        let mut guard = self.entries.lock();
        if guard.len() == HISTORY_CAPACITY {
            guard.pop_front();
        }
        guard.push_back(entry);
    }

    /// The most recent `n` entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<StatsHistoryEntry> {
        let guard = self.entries.lock();
        let skip = guard.len().saturating_sub(n);
        guard.iter().skip(skip).cloned().collect()
    }
}

impl Default for StatsHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

/// Per-worker resource usage, or a terminated marker when the probe can no
/// longer find the PID (spec.md §7, `StatsProbeFailure`).
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStats {
    pub port: u16,
    pub pid: Option<u32>,
    pub status: String,
    pub cpu_percent: f32,
    pub memory_rss_mb: f64,
    pub memory_percent: f32,
    pub threads: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub num_services: usize,
    pub ports: Vec<String>,
    pub cpu: Vec<f32>,
    pub mem_rss_mb: Vec<f64>,
    pub mem_percent: Vec<f32>,
    pub threads: Vec<u64>,
    pub ts: Vec<f64>,
    pub latency: Vec<f64>,
    pub rps: Vec<f64>,
    pub services: Vec<usize>,
    pub total_requests: Vec<u64>,
    pub response_times: Vec<f64>,
}

impl StatsSnapshot {
    fn empty() -> Self {
        Self {
            num_services: 0,
            ports: Vec::new(),
            cpu: Vec::new(),
            mem_rss_mb: Vec::new(),
            mem_percent: Vec::new(),
            threads: Vec::new(),
            ts: Vec::new(),
            latency: Vec::new(),
            rps: Vec::new(),
            services: Vec::new(),
            total_requests: Vec::new(),
            response_times: Vec::new(),
        }
    }
}

/// Maps a fleet port to its worker process's OS pid. The supervisor owns the
/// child handles exclusively, so the aggregator asks it for pids rather than
/// holding its own process table.
pub trait PidLookup: Send + Sync {
    fn pid_of(&self, port: u16) -> Option<u32>;
}

pub struct StatsAggregator {
    fleet: Arc<Fleet>,
    window: Arc<LatencyWindow>,
    history: Arc<StatsHistory>,
    pids: Arc<dyn PidLookup>,
    snapshot: Arc<ArcSwap<StatsSnapshot>>,
    interval: Duration,
}

impl StatsAggregator {
    pub fn new(
        fleet: Arc<Fleet>,
        window: Arc<LatencyWindow>,
        history: Arc<StatsHistory>,
        pids: Arc<dyn PidLookup>,
        interval: Duration,
    ) -> Self {
        Self {
            fleet,
            window,
            history,
            pids,
            snapshot: Arc::new(ArcSwap::from_pointee(StatsSnapshot::empty())),
            interval,
        }
    }

    pub fn snapshot_handle(&self) -> Arc<ArcSwap<StatsSnapshot>> {
        self.snapshot.clone()
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            self.tick();
        }
    }

    /// One aggregation cycle: probe the current fleet's processes, fold in
    /// the last 70 stats-history entries and the raw latency window, and
    /// publish the result.
    pub fn tick(&self) {
        let ports = self.fleet.snapshot();
        let mut system = System::new();
        system.refresh_memory();
        let total_memory_bytes = system.total_memory().max(1);

        let pids: Vec<(u16, Option<Pid>)> = ports
            .iter()
            .map(|&port| (port, self.pids.pid_of(port).map(Pid::from_u32)))
            .collect();
        let live_pids: Vec<Pid> = pids.iter().filter_map(|(_, pid)| *pid).collect();
        system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&live_pids), true);

        let mut instance_stats = Vec::with_capacity(ports.len());
        for (port, pid) in pids {
            let stat = match pid.and_then(|pid| system.process(pid)) {
                Some(process) => {
                    let rss_bytes = process.memory();
                    InstanceStats {
                        port,
                        pid: pid.map(|p| p.as_u32()),
                        status: format!("{:?}", process.status()),
                        cpu_percent: process.cpu_usage(),
                        memory_rss_mb: rss_bytes as f64 / (1024.0 * 1024.0),
                        memory_percent: (rss_bytes as f64 / total_memory_bytes as f64 * 100.0) as f32,
                        threads: process.tasks().map(|t| t.len() as u64).unwrap_or(0),
                    }
                }
                None => InstanceStats {
                    port,
                    pid: None,
                    status: "terminated".to_string(),
                    cpu_percent: 0.0,
                    memory_rss_mb: 0.0,
                    memory_percent: 0.0,
                    threads: 0,
                },
            };
            instance_stats.push(stat);
        }

        let recent = self.history.recent(HISTORY_WINDOW);
        let response_times = self.window.peek();

        let snapshot = StatsSnapshot {
            num_services: instance_stats.len(),
            ports: instance_stats.iter().map(|s| s.port.to_string()).collect(),
            cpu: instance_stats.iter().map(|s| s.cpu_percent).collect(),
            mem_rss_mb: instance_stats.iter().map(|s| s.memory_rss_mb).collect(),
            mem_percent: instance_stats.iter().map(|s| s.memory_percent).collect(),
            threads: instance_stats.iter().map(|s| s.threads).collect(),
            ts: recent.iter().map(|e| unix_seconds(e.t)).collect(),
            latency: recent.iter().map(|e| e.mean_latency).collect(),
            rps: recent.iter().map(|e| e.rps).collect(),
            services: recent.iter().map(|e| e.active_services).collect(),
            total_requests: recent.iter().map(|e| e.total_responses).collect(),
            response_times,
        };

        self.snapshot.store(Arc::new(snapshot));
    }
}

/// [`PidLookup`] backed by the supervisor's own child table, via a small
/// accessor added to [`Supervisor`] so the aggregator never reaches into the
/// process handles directly (spec.md §9: "child processes... exposed to
/// other components only as ports").
pub struct SupervisorPidLookup {
    supervisor: Arc<Supervisor>,
}

impl SupervisorPidLookup {
    pub fn new(supervisor: Arc<Supervisor>) -> Self {
        Self { supervisor }
    }
}

impl PidLookup for SupervisorPidLookup {
    fn pid_of(&self, port: u16) -> Option<u32> {
        self.supervisor.pid_of(port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_caps_at_1000_entries() {
        let history = StatsHistory::new();
        for i in 0..(HISTORY_CAPACITY + 10) {
            history.push(StatsHistoryEntry {
                t: SystemTime::now(),
                mean_latency: i as f64,
                rps: 1.0,
                active_services: 1,
                total_responses: i as u64,
            });
        }
        assert_eq!(history.recent(HISTORY_CAPACITY + 10).len(), HISTORY_CAPACITY);
    }

    #[test]
    fn recent_returns_last_n_oldest_first() {
        let history = StatsHistory::new();
        for i in 0..5 {
            history.push(StatsHistoryEntry {
                t: SystemTime::now(),
                mean_latency: i as f64,
                rps: 1.0,
                active_services: 1,
                total_responses: i as u64,
            });
        }
        let recent = history.recent(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].mean_latency, 3.0);
        assert_eq!(recent[1].mean_latency, 4.0);
    }
}
