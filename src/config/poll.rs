use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Basic convergence policy template
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Overall budget (unit: milliseconds)
    pub timeout_ms: u64,

    /// Pause between evaluations (unit: milliseconds)
    pub interval_ms: u64,

    /// Consecutive transient errors tolerated (0 means unlimited)
    #[serde(default)]
    pub max_consecutive_errors: u32,
}

impl PollPolicy {
    pub const fn new(
        timeout: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            interval_ms: interval.as_millis() as u64,
            max_consecutive_errors: 0,
        }
    }

    pub fn with_max_consecutive_errors(
        mut self,
        max: u32,
    ) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    /// Same interval and error budget, different overall timeout
    pub fn with_timeout(
        mut self,
        timeout: Duration,
    ) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    fn validate(
        &self,
        name: &str,
    ) -> Result<()> {
        if self.interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "poll.{name}.interval_ms must be > 0"
            ))));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config(ConfigError::Message(format!(
                "poll.{name}.timeout_ms must be > 0"
            ))));
        }
        Ok(())
    }
}

/// Divide policies by the kind of wait
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PollPolicies {
    /// Process liveness probes (pgrep, kill -0)
    #[serde(default = "default_process_policy")]
    pub process: PollPolicy,

    /// Catalog convergence after an admin action
    #[serde(default = "default_catalog_policy")]
    pub catalog: PollPolicy,

    /// Full cluster re-sync waits
    #[serde(default = "default_resync_policy")]
    pub resync: PollPolicy,

    /// Waiting for the master to accept connections again
    #[serde(default = "default_connection_policy")]
    pub connection: PollPolicy,
}

impl Default for PollPolicies {
    fn default() -> Self {
        Self {
            process: default_process_policy(),
            catalog: default_catalog_policy(),
            resync: default_resync_policy(),
            connection: default_connection_policy(),
        }
    }
}

impl PollPolicies {
    pub fn validate(&self) -> Result<()> {
        self.process.validate("process")?;
        self.catalog.validate("catalog")?;
        self.resync.validate("resync")?;
        self.connection.validate("connection")?;
        Ok(())
    }
}

fn default_process_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(120), Duration::from_secs(2))
}
fn default_catalog_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(120), Duration::from_secs(2))
}
fn default_resync_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(600), Duration::from_secs(10))
}
fn default_connection_policy() -> PollPolicy {
    PollPolicy::new(Duration::from_secs(150), Duration::from_secs(1))
}
