//! Governance limits.

use std::time::Duration;

use anyhow::{Result, ensure};
use serde::{Deserialize, Serialize};

use crate::container::ResourceLimits;

/// Time, resource and concurrency limits applied to every session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Inactivity after which a session is terminated.
    pub idle_timeout_ms: u64,
    /// Absolute session lifetime, never extended by activity.
    pub max_lifetime_ms: u64,
    pub cpu_limit: f64,
    pub memory_limit_mb: u64,
    pub pids_limit: i64,
    /// In-flight execs allowed per session; no queueing beyond this.
    pub max_concurrent_execs_per_session: usize,
}

impl Default for GovernanceConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 30 * 60 * 1000,
            max_lifetime_ms: 4 * 60 * 60 * 1000,
            cpu_limit: 1.0,
            memory_limit_mb: 1024,
            pids_limit: 256,
            max_concurrent_execs_per_session: 2,
        }
    }
}

impl GovernanceConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }

    /// Container limits derived from this configuration.
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpus: self.cpu_limit,
            memory_mb: self.memory_limit_mb,
            pids: self.pids_limit,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.idle_timeout_ms > 0, "governance.idle_timeout_ms must be > 0");
        ensure!(self.max_lifetime_ms > 0, "governance.max_lifetime_ms must be > 0");
        ensure!(
            self.max_concurrent_execs_per_session > 0,
            "governance.max_concurrent_execs_per_session must be > 0"
        );
        self.limits()
            .validate()
            .map_err(|e| anyhow::anyhow!("governance limits: {e}"))?;
        Ok(())
    }
}
