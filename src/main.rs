//! Lifecycle driver (spec.md §4.H).
//!
//! Parses the CLI, spawns the initial fleet, launches the autoscaler and
//! stats aggregator as background tasks, serves the proxy, and registers
//! cleanup on shutdown. Startup failures (bind error, cannot spawn the
//! initial fleet) exit nonzero with context, matching
//! `sweetmcp-pingora::main`'s `run_server` + `std::process::exit(1)` shape —
//! everything past startup is logged and the process keeps running.

use std::sync::Arc;

use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use clap::Parser;

use autoscale_proxy::app::{build_router, AppState};
use autoscale_proxy::autoscaler::Autoscaler;
use autoscale_proxy::config::{Cli, ScalingConfig};
use autoscale_proxy::fleet::Fleet;
use autoscale_proxy::latency::LatencyWindow;
use autoscale_proxy::stats::{StatsAggregator, StatsHistory, StatsSnapshot, SupervisorPidLookup};
use autoscale_proxy::supervisor::Supervisor;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = run() {
        tracing::error!(error = %e, "autoscale-proxy failed to start");
        eprintln!("autoscale-proxy failed to start: {e:#}");
        std::process::exit(1);
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn run() -> Result<()> {
    let cli = Cli::parse();
    let scaling = ScalingConfig::from(&cli);

    let fleet = Arc::new(Fleet::new());
    let supervisor = Arc::new(Supervisor::new(
        fleet.clone(),
        cli.application.clone(),
        scaling.clone(),
    ));

    for i in 0..cli.n as u16 {
        let port = cli.service_port_start + i;
        supervisor
            .spawn(port)
            .with_context(|| format!("failed to spawn initial worker on port {port}"))?;
    }
    tracing::info!(count = cli.n, "initial fleet started");

    let latency_window = Arc::new(LatencyWindow::new());
    let history = Arc::new(StatsHistory::new());

    let autoscaler = Arc::new(Autoscaler::new(
        fleet.clone(),
        supervisor.clone(),
        latency_window.clone(),
        history.clone(),
        scaling.clone(),
    ));
    tokio::spawn(autoscaler.run());

    let pids = Arc::new(SupervisorPidLookup::new(supervisor.clone()));
    let aggregator = Arc::new(StatsAggregator::new(
        fleet.clone(),
        latency_window.clone(),
        history.clone(),
        pids,
        cli.sample_time(),
    ));
    let stats_snapshot: Arc<ArcSwap<StatsSnapshot>> = aggregator.snapshot_handle();
    tokio::spawn(aggregator.run());

    let state = Arc::new(AppState::new(
        fleet,
        latency_window,
        cli.url_base.clone(),
        cli.forward_timeout(),
        stats_snapshot,
    )?);

    let router = build_router(state);
    let listener = tokio::net::TcpListener::bind(&cli.bind)
        .await
        .with_context(|| format!("failed to bind {}", cli.bind))?;
    tracing::info!(bind = %cli.bind, "autoscale-proxy ready");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("proxy server exited unexpectedly")?;

    supervisor.cleanup().await;
    tracing::info!("cleanup complete, exiting");
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
