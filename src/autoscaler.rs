//! Autoscaler control loop (spec.md §4.F).
//!
//! Ticks every `SAMPLE_TIME`. Reads the latency window, computes median/p95,
//! records a stats-history entry, and — subject to a cooldown — applies the
//! first matching scale rule. State machine is a single loop; the invariant
//! worth guarding is rule order and cooldown gating, so those are split into
//! a pure [`decide`] function that the background loop calls and that tests
//! can call directly without waiting on real timers.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::Mutex;

use crate::config::ScalingConfig;
use crate::fleet::Fleet;
use crate::latency::LatencyWindow;
use crate::stats::{StatsHistory, StatsHistoryEntry};
use crate::supervisor::Supervisor;

/// The first-matching-rule scale policy, spec.md §4.F step 6, expressed as
/// a pure function of the window statistics and fleet bounds so it can be
/// exercised without a running clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    SpawnBatch(usize),
    TerminateLast,
    Hold,
}

pub fn decide(median: f64, p95: f64, fleet_len: usize, min: usize, max: usize) -> ScaleDecision {
    if p95 > 1.0 && fleet_len < max {
        ScaleDecision::SpawnBatch(2.min(max - fleet_len))
    } else if p95 > 0.6 && fleet_len < max {
        ScaleDecision::SpawnBatch(1)
    } else if median < 0.3 && fleet_len > min {
        ScaleDecision::TerminateLast
    } else {
        ScaleDecision::Hold
    }
}

/// Lower median (`samples[floor(n/2)]`, 0-indexed) per spec.md §4.F step 3.
fn median_of_sorted(sorted: &[f64]) -> f64 {
    sorted[sorted.len() / 2]
}

/// p95 index `max(0, floor(0.95*n) - 1)` per spec.md §4.F step 3.
fn p95_of_sorted(sorted: &[f64]) -> f64 {
    let n = sorted.len();
    let idx = ((0.95 * n as f64) as usize).saturating_sub(1);
    sorted[idx.min(n - 1)]
}

pub struct TickReport {
    pub skipped: bool,
    pub decision: Option<ScaleDecision>,
}

pub struct Autoscaler {
    fleet: Arc<Fleet>,
    supervisor: Arc<Supervisor>,
    window: Arc<LatencyWindow>,
    history: Arc<StatsHistory>,
    config: ScalingConfig,
    last_scale: Mutex<Instant>,
}

impl Autoscaler {
    pub fn new(
        fleet: Arc<Fleet>,
        supervisor: Arc<Supervisor>,
        window: Arc<LatencyWindow>,
        history: Arc<StatsHistory>,
        config: ScalingConfig,
    ) -> Self {
        // Cooldown has already elapsed at startup so the first scale
        // opportunity is not gated by a phantom prior scale.
        let last_scale = Instant::now() - config.cooldown;
        Self {
            fleet,
            supervisor,
            window,
            history,
            config,
            last_scale: Mutex::new(last_scale),
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.sample_time);
        ticker.tick().await; // first tick fires immediately; skip it
        loop {
            ticker.tick().await;
            self.tick().await;
        }
    }

    /// One evaluation cycle. Public so tests and the dashboard lifecycle can
    /// drive it deterministically.
    pub async fn tick(&self) -> TickReport {
        let samples = self.window.peek();
        if samples.len() < self.config.min_samples {
            return TickReport {
                skipped: true,
                decision: None,
            };
        }

        let mut sorted = samples.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let median = median_of_sorted(&sorted);
        let p95 = p95_of_sorted(&sorted);
        let rps = sorted.len() as f64 / self.config.sample_time.as_secs_f64();
        let mean = sorted.iter().sum::<f64>() / sorted.len() as f64;

        tracing::debug!(median, p95, rps, instances = self.fleet.len(), "autoscaler tick");

        self.history.push(StatsHistoryEntry {
            t: SystemTime::now(),
            mean_latency: mean,
            rps,
            active_services: self.fleet.len(),
            total_responses: self.fleet.total_requests(),
        });

        let mut last_scale = self.last_scale.lock();
        let now = Instant::now();
        let decision = if now.duration_since(*last_scale) < self.config.cooldown {
            None
        } else {
            let decision = decide(
                median,
                p95,
                self.fleet.len(),
                self.config.min_services,
                self.config.max_services,
            );
            match decision {
                ScaleDecision::SpawnBatch(k) => {
                    self.supervisor.spawn_batch(k);
                    *last_scale = now;
                }
                ScaleDecision::TerminateLast => {
                    self.supervisor.terminate_last().await;
                    *last_scale = now;
                }
                ScaleDecision::Hold => {}
            }
            Some(decision)
        };
        drop(last_scale);

        self.window.clear();

        TickReport {
            skipped: false,
            decision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::Supervisor;

    fn scaling(min: usize, max: usize, cooldown_ms: u64) -> ScalingConfig {
        ScalingConfig {
            min_services: min,
            max_services: max,
            service_port_start: 9200,
            sample_time: Duration::from_secs(2),
            min_samples: 5,
            cooldown: Duration::from_millis(cooldown_ms),
        }
    }

    #[test]
    fn rule_order_prefers_spike_spawn_over_mid_band() {
        assert_eq!(decide(0.5, 1.2, 1, 1, 4), ScaleDecision::SpawnBatch(2));
    }

    #[test]
    fn mid_band_spawns_one() {
        assert_eq!(decide(0.5, 0.8, 2, 1, 4), ScaleDecision::SpawnBatch(1));
    }

    #[test]
    fn scale_down_below_median_floor() {
        assert_eq!(decide(0.15, 0.2, 3, 1, 4), ScaleDecision::TerminateLast);
    }

    #[test]
    fn holds_when_fleet_already_at_max() {
        assert_eq!(decide(0.5, 1.5, 4, 1, 4), ScaleDecision::Hold);
    }

    #[test]
    fn holds_when_fleet_already_at_min() {
        assert_eq!(decide(0.1, 0.2, 1, 1, 4), ScaleDecision::Hold);
    }

    #[test]
    fn spawn_batch_caps_at_remaining_headroom() {
        assert_eq!(decide(0.5, 1.5, 3, 1, 4), ScaleDecision::SpawnBatch(1));
    }

    #[tokio::test]
    async fn tick_skips_below_min_samples_without_clearing_or_touching_history() {
        let fleet = Arc::new(Fleet::new());
        fleet.add(9200).unwrap();
        let supervisor = Arc::new(Supervisor::new(fleet.clone(), "true".into(), scaling(1, 4, 6000)));
        let window = Arc::new(LatencyWindow::new());
        window.append(0.2);
        let history = Arc::new(StatsHistory::new());
        let autoscaler = Autoscaler::new(fleet, supervisor, window.clone(), history.clone(), scaling(1, 4, 6000));

        let report = autoscaler.tick().await;
        assert!(report.skipped);
        assert_eq!(window.len(), 1);
        assert!(history.recent(10).is_empty());
    }

    #[tokio::test]
    async fn tick_scales_up_on_spike_and_clears_window() {
        let fleet = Arc::new(Fleet::new());
        fleet.add(9200).unwrap();
        let supervisor = Arc::new(Supervisor::new(fleet.clone(), "true".into(), scaling(1, 4, 0)));
        let window = Arc::new(LatencyWindow::new());
        for v in [1.2, 1.3, 1.1, 1.4, 1.2] {
            window.append(v);
        }
        let history = Arc::new(StatsHistory::new());
        let autoscaler = Autoscaler::new(fleet.clone(), supervisor, window.clone(), history.clone(), scaling(1, 4, 0));

        let report = autoscaler.tick().await;
        assert_eq!(report.decision, Some(ScaleDecision::SpawnBatch(2)));
        assert_eq!(fleet.len(), 3);
        assert!(window.is_empty());
        assert_eq!(history.recent(10).len(), 1);
    }

    #[tokio::test]
    async fn cooldown_blocks_a_second_scale_but_still_clears_and_records() {
        let fleet = Arc::new(Fleet::new());
        fleet.add(9200).unwrap();
        let supervisor = Arc::new(Supervisor::new(fleet.clone(), "true".into(), scaling(1, 4, 6000)));
        let window = Arc::new(LatencyWindow::new());
        for v in [1.5, 1.5, 1.5, 1.5, 1.5] {
            window.append(v);
        }
        let history = Arc::new(StatsHistory::new());
        let autoscaler = Autoscaler::new(fleet.clone(), supervisor, window.clone(), history.clone(), scaling(1, 4, 6000));

        let first = autoscaler.tick().await;
        assert_eq!(first.decision, Some(ScaleDecision::SpawnBatch(2)));

        for v in [1.5, 1.5, 1.5, 1.5, 1.5] {
            window.append(v);
        }
        let second = autoscaler.tick().await;
        assert_eq!(second.decision, None);
        assert!(window.is_empty());
        assert_eq!(history.recent(10).len(), 2);
    }
}
