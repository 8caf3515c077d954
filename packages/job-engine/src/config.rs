use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use typed_builder::TypedBuilder;

use crate::kernel::jobs::JobWorkerConfig;

/// What to do at startup with records a previous process left Pending or
/// Running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrphanPolicy {
    /// Record them as failed with "orphaned at restart".
    #[default]
    MarkFailed,
    /// Run them again when the catalog knows their name.
    Requeue,
}

impl FromStr for OrphanPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mark_failed" | "mark-failed" => Ok(Self::MarkFailed),
            "requeue" => Ok(Self::Requeue),
            other => bail!("unknown orphan policy {other:?} (expected mark_failed or requeue)"),
        }
    }
}

impl fmt::Display for OrphanPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MarkFailed => write!(f, "mark_failed"),
            Self::Requeue => write!(f, "requeue"),
        }
    }
}

/// Engine configuration loaded from environment variables
#[derive(Debug, Clone, TypedBuilder)]
pub struct JobEngineConfig {
    /// How long the worker waits on an empty queue
    #[builder(default = Duration::from_secs(1))]
    pub poll_interval: Duration,
    /// Heartbeat period for the running job
    #[builder(default = Duration::from_secs(30))]
    pub heartbeat_interval: Duration,
    /// How long services get to stop after shutdown is requested
    #[builder(default = Duration::from_secs(30))]
    pub shutdown_grace: Duration,
    /// Buffer size of the lifecycle event channel
    #[builder(default = 256)]
    pub event_capacity: usize,
    #[builder(default)]
    pub orphan_policy: OrphanPolicy,
    /// Selects the Postgres store when set
    #[builder(default, setter(strip_option, into))]
    pub database_url: Option<String>,
}

impl Default for JobEngineConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl JobEngineConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable lookup. Unset variables keep
    /// their defaults.
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = lookup("JOB_POLL_INTERVAL_MS") {
            let ms: u64 = ms
                .trim()
                .parse()
                .context("JOB_POLL_INTERVAL_MS must be a number of milliseconds")?;
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(secs) = lookup("JOB_HEARTBEAT_INTERVAL_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .context("JOB_HEARTBEAT_INTERVAL_SECS must be a number of seconds")?;
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = lookup("JOB_SHUTDOWN_GRACE_SECS") {
            let secs: u64 = secs
                .trim()
                .parse()
                .context("JOB_SHUTDOWN_GRACE_SECS must be a number of seconds")?;
            config.shutdown_grace = Duration::from_secs(secs);
        }
        if let Some(capacity) = lookup("JOB_EVENT_CAPACITY") {
            config.event_capacity = capacity
                .trim()
                .parse()
                .context("JOB_EVENT_CAPACITY must be a positive number")?;
        }
        if let Some(policy) = lookup("JOB_ORPHAN_POLICY") {
            config.orphan_policy = policy.parse().context("Invalid JOB_ORPHAN_POLICY")?;
        }
        config.database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            bail!("poll interval must be greater than zero");
        }
        if self.heartbeat_interval.is_zero() {
            bail!("heartbeat interval must be greater than zero");
        }
        if self.event_capacity == 0 {
            bail!("event capacity must be greater than zero");
        }
        Ok(())
    }

    pub fn worker_config(&self) -> JobWorkerConfig {
        JobWorkerConfig::default()
            .with_poll_interval(self.poll_interval)
            .with_heartbeat_interval(self.heartbeat_interval)
    }
}
