//! Orchestrator configuration.
//!
//! Timings default to values that converge well inside the suite's
//! observation window. Every field can be overridden from the environment.

use std::time::Duration;

use anyhow::{Context, Result};
use vizzini_reconcile::{RestartPolicy, DEFAULT_CONVERGENCE_TICK};

/// Orchestrator configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Route domain; hostnames are `{guid label}.{domain}`.
    pub domain: String,

    /// Number of simulated cells instances are placed onto.
    pub cell_count: usize,

    /// Scheduler tick.
    pub convergence_interval: Duration,

    /// Full route resync period, on top of event-driven updates.
    pub route_sync_interval: Duration,

    /// Time between claim and Running.
    pub boot_delay: Duration,

    /// How long a retired container keeps serving in-flight traffic.
    pub drain_delay: Duration,

    /// Crash restart policy.
    pub restart_policy: RestartPolicy,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            domain: "vizzini.test".to_string(),
            cell_count: 2,
            convergence_interval: DEFAULT_CONVERGENCE_TICK,
            route_sync_interval: Duration::from_secs(1),
            boot_delay: Duration::from_millis(20),
            drain_delay: Duration::from_millis(100),
            restart_policy: RestartPolicy::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let domain = std::env::var("VIZZINI_DOMAIN").unwrap_or(defaults.domain);

        let cell_count = env_parse::<usize>("VIZZINI_CELL_COUNT")?
            .unwrap_or(defaults.cell_count)
            .clamp(1, 64);

        let convergence_interval = env_millis("VIZZINI_CONVERGENCE_INTERVAL_MS")?
            .unwrap_or(defaults.convergence_interval)
            .max(Duration::from_millis(1));

        let route_sync_interval = env_millis("VIZZINI_ROUTE_SYNC_INTERVAL_MS")?
            .unwrap_or(defaults.route_sync_interval)
            .max(Duration::from_millis(50));

        let boot_delay = env_millis("VIZZINI_BOOT_DELAY_MS")?.unwrap_or(defaults.boot_delay);
        let drain_delay = env_millis("VIZZINI_DRAIN_DELAY_MS")?.unwrap_or(defaults.drain_delay);

        let mut restart_policy = defaults.restart_policy;
        if let Some(max) = env_parse::<u32>("VIZZINI_MAX_RESTART_ATTEMPTS")? {
            restart_policy.max_restart_attempts = max;
        }

        let log_level = std::env::var("VIZZINI_LOG_LEVEL").unwrap_or(defaults.log_level);

        Ok(Self {
            domain,
            cell_count,
            convergence_interval,
            route_sync_interval,
            boot_delay,
            drain_delay,
            restart_policy,
            log_level,
        })
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    std::env::var(key)
        .ok()
        .map(|v| v.parse::<T>())
        .transpose()
        .with_context(|| format!("{key} must be an integer."))
}

fn env_millis(key: &str) -> Result<Option<Duration>> {
    Ok(env_parse::<u64>(key)?.map(Duration::from_millis))
}
