//! CLI and runtime configuration.
//!
//! The original source reads four positional `sys.argv` entries and keeps the
//! scaling knobs as module-level constants. This crate parses the same four
//! positionals with `clap::Parser` (matching `sweetmcp-daemon`'s CLI style)
//! and surfaces the scaling knobs as optional flags carrying the spec's
//! original defaults, so the defaults and semantics are unchanged but no
//! longer require a recompile to tune.

use std::time::Duration;

use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "autoscale-proxy",
    about = "Autoscaling round-robin reverse proxy for a pool of local worker processes"
)]
pub struct Cli {
    /// Initial worker count.
    #[arg(default_value_t = 1)]
    pub n: usize,

    /// Path to the worker executable, invoked as `<application> <port>`.
    #[arg(default_value = "app.py")]
    pub application: String,

    /// Scheme+host prefix for worker URLs.
    #[arg(default_value = "http://localhost")]
    pub url_base: String,

    /// Legacy endpoint suffix default, unused by the path-forwarding proxy.
    #[arg(default_value = "/process")]
    pub endpoint: String,

    /// Address the load balancer itself listens on.
    #[arg(long, env = "LB_BIND", default_value = "0.0.0.0:5000")]
    pub bind: String,

    /// Lower bound on fleet size.
    #[arg(long, env = "LB_MIN_SERVICES", default_value_t = 1)]
    pub min_services: usize,

    /// Upper bound on fleet size.
    #[arg(long, env = "LB_MAX_SERVICES", default_value_t = 4)]
    pub max_services: usize,

    /// First port allocated to a worker.
    #[arg(long, env = "LB_SERVICE_PORT_START", default_value_t = 8000)]
    pub service_port_start: u16,

    /// Autoscaler tick interval, in seconds.
    #[arg(long, env = "LB_SAMPLE_TIME", default_value_t = 2)]
    pub sample_time_secs: u64,

    /// Minimum number of latency samples required before a tick evaluates.
    #[arg(long, env = "LB_MIN_SAMPLES", default_value_t = 5)]
    pub min_samples: usize,

    /// Minimum wall-clock interval between consecutive scaling actions.
    #[arg(long, env = "LB_COOLDOWN", default_value_t = 6)]
    pub cooldown_secs: u64,

    /// Timeout applied to the outbound forward to a worker.
    #[arg(long, env = "LB_FORWARD_TIMEOUT", default_value_t = 30)]
    pub forward_timeout_secs: u64,
}

impl Cli {
    pub fn sample_time(&self) -> Duration {
        Duration::from_secs(self.sample_time_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_secs(self.forward_timeout_secs)
    }
}

/// Scaling and sampling parameters split out of [`Cli`] so non-CLI callers
/// (tests, the autoscaler, the supervisor) can construct them directly.
#[derive(Debug, Clone)]
pub struct ScalingConfig {
    pub min_services: usize,
    pub max_services: usize,
    pub service_port_start: u16,
    pub sample_time: Duration,
    pub min_samples: usize,
    pub cooldown: Duration,
}

impl From<&Cli> for ScalingConfig {
    fn from(cli: &Cli) -> Self {
        Self {
            min_services: cli.min_services,
            max_services: cli.max_services,
            service_port_start: cli.service_port_start,
            sample_time: cli.sample_time(),
            min_samples: cli.min_samples,
            cooldown: cli.cooldown(),
        }
    }
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            min_services: 1,
            max_services: 4,
            service_port_start: 8000,
            sample_time: Duration::from_secs(2),
            min_samples: 5,
            cooldown: Duration::from_secs(6),
        }
    }
}
