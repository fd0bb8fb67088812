//! Supervisor loop configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Period of the health / convergence loop
    #[serde(default = "default_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// A busy worker silent for longer than this is killed
    #[serde(default = "default_stall_threshold", with = "humantime_serde")]
    pub stall_threshold: Duration,

    /// Time in-flight requests get to finish during shutdown
    #[serde(default = "default_shutdown_grace", with = "humantime_serde")]
    pub shutdown_grace: Duration,

    /// Time a new generation gets to become ready during reload
    #[serde(default = "default_reload_timeout", with = "humantime_serde")]
    pub reload_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            stall_threshold: default_stall_threshold(),
            shutdown_grace: default_shutdown_grace(),
            reload_timeout: default_reload_timeout(),
        }
    }
}

impl Validatable for SupervisorConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_duration(self.interval, "interval", self.domain_name())?;
        validate_duration(self.stall_threshold, "stall_threshold", self.domain_name())?;
        validate_duration(self.reload_timeout, "reload_timeout", self.domain_name())?;

        if self.stall_threshold < self.interval {
            log::warn!(
                "supervisor.stall_threshold ({:?}) is shorter than the check interval ({:?})",
                self.stall_threshold,
                self.interval
            );
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "supervisor"
    }
}

fn default_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_stall_threshold() -> Duration {
    Duration::from_secs(60)
}

fn default_shutdown_grace() -> Duration {
    Duration::from_secs(30)
}

fn default_reload_timeout() -> Duration {
    Duration::from_secs(60)
}
