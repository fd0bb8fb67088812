//! Domain-driven configuration management for Resident
//!
//! Configuration is split by functional domain (pool, supervisor, listeners,
//! logging), loaded from YAML, overridden from `RESIDENT_*` environment
//! variables and validated per domain.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use validation::Validatable;

// Re-export domain configurations
pub use domains::{
    listener::ListenerConfig,
    logging::{LogFormat, LogLevel, LoggingConfig},
    pool::{frame_bytes_for_body, PoolConfig, SpawnRetryConfig, FRAME_HEADROOM_BYTES},
    supervisor::SupervisorConfig,
    ResidentConfig,
};
