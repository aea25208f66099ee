//! Worker supervisor (spec.md §4.D).
//!
//! Owns every worker's OS process handle; no other component may signal a
//! child. Grounded in `sweetmcp-daemon::service::pingora::PingoraService`,
//! which spawns its own child binary with `std::process::Command` +
//! `Stdio::null()` and kills it on `Cmd::Stop`/`Cmd::Shutdown` — adapted here
//! to `tokio::process` so spawn/terminate can run from async background
//! tasks without blocking the runtime.

use std::process::Stdio;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::config::ScalingConfig;
use crate::error::SupervisorError;
use crate::fleet::Fleet;

pub struct Supervisor {
    fleet: Arc<Fleet>,
    children: Mutex<std::collections::HashMap<u16, Child>>,
    application: String,
    scaling: ScalingConfig,
}

impl Supervisor {
    pub fn new(fleet: Arc<Fleet>, application: String, scaling: ScalingConfig) -> Self {
        Self {
            fleet,
            children: Mutex::new(std::collections::HashMap::new()),
            application,
            scaling,
        }
    }

    pub fn fleet(&self) -> &Arc<Fleet> {
        &self.fleet
    }

    /// OS pid of the worker bound to `port`, if it is still running. The
    /// stats aggregator uses this to probe per-process resource usage
    /// without ever touching the `Child` handle itself (spec.md §9: process
    /// handles are exposed to other components only as ports).
    pub fn pid_of(&self, port: u16) -> Option<u32> {
        self.children.lock().get(&port).and_then(|c| c.id())
    }

    /// Start a child process bound to `port`. Fails if the port is already
    /// registered (I1) or the OS spawn fails.
    pub fn spawn(&self, port: u16) -> Result<(), SupervisorError> {
        if self.fleet.contains(port) {
            return Err(SupervisorError::PortInUse(port));
        }

        let child = Command::new(&self.application)
            .arg(port.to_string())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SupervisorError::SpawnFailed { port, source })?;

        self.children.lock().insert(port, child);
        // Registration happens after the child exists; if this somehow
        // raced with a concurrent add of the same port the uniqueness
        // check above would have to have missed it, which cannot happen
        // since `self.fleet` mutation is itself serialized.
        self.fleet
            .add(port)
            .expect("port uniqueness was just checked above");

        tracing::info!(port, application = %self.application, "spawned worker");
        Ok(())
    }

    /// Pop the last-added worker and terminate its process. No-op if the
    /// fleet is already at `MIN_SERVICES`.
    pub async fn terminate_last(&self) {
        if self.fleet.len() <= self.scaling.min_services {
            return;
        }

        let Some(worker) = self.fleet.remove_last() else {
            return;
        };

        let child = self.children.lock().remove(&worker.port);
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::warn!(port = worker.port, error = %e, "failed to signal worker termination");
            }
        }
        tracing::info!(port = worker.port, "terminated worker");
    }

    /// Spawn `k` consecutive workers starting just above the highest
    /// currently-allocated port (or `SERVICE_PORT_START` if the fleet is
    /// empty). Used only by the autoscaler on scale-up.
    pub fn spawn_batch(&self, k: usize) {
        let anchor = self
            .fleet
            .max_port()
            .unwrap_or(self.scaling.service_port_start)
            .max(self.scaling.service_port_start);
        let base = anchor + 1;

        for i in 0..k as u16 {
            let port = base + i;
            if let Err(e) = self.spawn(port) {
                tracing::warn!(port, error = %e, "spawn failed during scale-up batch");
            }
        }
    }

    /// Terminate every worker process. Invoked once, from the lifecycle
    /// driver on shutdown.
    pub async fn cleanup(&self) {
        let entries: Vec<(u16, Child)> = {
            let mut children = self.children.lock();
            children.drain().collect()
        };
        for (port, mut child) in entries {
            if let Err(e) = child.kill().await {
                tracing::warn!(port, error = %e, "failed to kill worker during cleanup");
            }
        }
    }
}
