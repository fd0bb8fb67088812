//! Worker pool configuration

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Room left in an IPC frame for the envelope, method, target and headers
pub const FRAME_HEADROOM_BYTES: usize = 64 * 1024;

/// Smallest frame limit that carries a body of `body_bytes` once base64
/// encoded, plus [`FRAME_HEADROOM_BYTES`]
pub fn frame_bytes_for_body(body_bytes: usize) -> usize {
    body_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(FRAME_HEADROOM_BYTES)
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Desired number of live workers
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Worker executable. When unset, the current executable is started in
    /// worker mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Arguments passed to the worker executable
    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment for worker processes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Working directory for worker processes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,

    /// Recycle a worker after this many successful requests
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_requests: Option<u64>,

    /// Recycle a worker once its resident memory reaches this many MiB
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_mib: Option<u64>,

    /// Recycle a worker once it has been alive this long
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_ttl: Option<Duration>,

    /// Recycle an idle worker once it has been idle this long
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub max_idle: Option<Duration>,

    /// Time allowed between spawn and the ready reply
    #[serde(default = "default_startup_timeout", with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Default deadline applied to inbound requests
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,

    /// How long an abandoned exchange may still complete before the worker
    /// is declared dead
    #[serde(default = "default_cancel_grace", with = "humantime_serde")]
    pub cancel_grace: Duration,

    /// Time a draining worker gets to exit before it is killed
    #[serde(default = "default_stop_timeout", with = "humantime_serde")]
    pub stop_timeout: Duration,

    /// Upper bound on a single IPC frame
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,

    /// Spawn retry policy
    #[serde(default)]
    pub spawn_retry: SpawnRetryConfig,
}

/// Backoff policy for failed spawns, applied per worker slot
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRetryConfig {
    /// Attempts before the slot is given up until the next supervisor tick
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay", with = "humantime_serde")]
    pub initial_delay: Duration,

    #[serde(default = "default_max_delay", with = "humantime_serde")]
    pub max_delay: Duration,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: None,
            max_requests: None,
            max_memory_mib: None,
            max_ttl: None,
            max_idle: None,
            startup_timeout: default_startup_timeout(),
            request_timeout: default_request_timeout(),
            cancel_grace: default_cancel_grace(),
            stop_timeout: default_stop_timeout(),
            max_frame_bytes: default_max_frame_bytes(),
            spawn_retry: SpawnRetryConfig::default(),
        }
    }
}

impl Default for SpawnRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

impl PoolConfig {
    /// Memory threshold in bytes, if configured
    pub fn max_memory_bytes(&self) -> Option<u64> {
        self.max_memory_mib.map(|mib| mib.saturating_mul(1024 * 1024))
    }
}

impl Validatable for PoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        if let Some(command) = &self.command {
            validate_required_string(command, "command", self.domain_name())?;
        }

        if let Some(max_requests) = self.max_requests {
            validate_positive(max_requests, "max_requests", self.domain_name())?;
        }

        if let Some(max_memory) = self.max_memory_mib {
            validate_positive(max_memory, "max_memory_mib", self.domain_name())?;
        }

        if let Some(ttl) = self.max_ttl {
            validate_duration(ttl, "max_ttl", self.domain_name())?;
        }

        if let Some(idle) = self.max_idle {
            validate_duration(idle, "max_idle", self.domain_name())?;
        }

        validate_duration(self.startup_timeout, "startup_timeout", self.domain_name())?;
        validate_duration(self.request_timeout, "request_timeout", self.domain_name())?;
        validate_duration(self.stop_timeout, "stop_timeout", self.domain_name())?;
        validate_positive(self.max_frame_bytes, "max_frame_bytes", self.domain_name())?;

        if self.workers == 0 {
            log::warn!("pool.workers is 0; requests will fail until the pool is resized");
        }

        self.spawn_retry.validate()
    }

    fn domain_name(&self) -> &'static str {
        "pool"
    }
}

impl Validatable for SpawnRetryConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;

        if self.multiplier < 1.0 {
            return Err(self.validation_error(format!(
                "multiplier must be at least 1.0, got {}",
                self.multiplier
            )));
        }

        if self.initial_delay > self.max_delay {
            return Err(self.validation_error("initial_delay cannot exceed max_delay"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "pool.spawn_retry"
    }
}

// Default value functions
fn default_workers() -> usize {
    4
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_cancel_grace() -> Duration {
    Duration::from_secs(5)
}

fn default_stop_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_frame_bytes() -> usize {
    16 * 1024 * 1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_millis(100)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(10)
}

fn default_multiplier() -> f64 {
    2.0
}
