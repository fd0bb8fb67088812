//! Domain-specific configuration modules

pub mod listener;
pub mod logging;
pub mod pool;
pub mod supervisor;
pub mod utils;

use crate::error::{ConfigError, ConfigResult};
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Resident configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidentConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub pool: pool::PoolConfig,

    /// Supervisor loop configuration
    #[serde(default)]
    pub supervisor: supervisor::SupervisorConfig,

    /// HTTP listener (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http: Option<listener::ListenerConfig>,

    /// Raw socket listener (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<listener::ListenerConfig>,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl Default for ResidentConfig {
    fn default() -> Self {
        Self {
            pool: pool::PoolConfig::default(),
            supervisor: supervisor::SupervisorConfig::default(),
            http: Some(listener::ListenerConfig::http_default()),
            socket: None,
            logging: logging::LoggingConfig::default(),
        }
    }
}

impl ResidentConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.pool.validate()?;
        self.supervisor.validate()?;
        self.logging.validate()?;

        if let Some(ref http) = self.http {
            http.validate()?;
            self.check_body_fits_frame(http, "http")?;
        }

        if let Some(ref socket) = self.socket {
            socket.validate()?;
            self.check_body_fits_frame(socket, "socket")?;
            if socket.health_path.is_some() {
                log::warn!("socket.health_path is ignored; only the HTTP listener serves it");
            }
        }

        if self.http.is_none() && self.socket.is_none() {
            log::warn!("No listener configured; workers will run without receiving traffic");
        }

        Ok(())
    }

    /// A body the listener accepts must still fit one IPC frame to a worker
    fn check_body_fits_frame(
        &self,
        listener: &listener::ListenerConfig,
        domain: &str,
    ) -> ConfigResult<()> {
        let needed = pool::frame_bytes_for_body(listener.max_body_bytes);
        if needed > self.pool.max_frame_bytes {
            return Err(ConfigError::DomainError {
                domain: domain.to_string(),
                message: format!(
                    "max_body_bytes {} needs IPC frames of {} bytes but pool.max_frame_bytes is {}",
                    listener.max_body_bytes, needed, self.pool.max_frame_bytes
                ),
            });
        }
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let mut config = ResidentConfig::default();
        config.socket = Some(listener::ListenerConfig::socket_default());
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_has_http_only() {
        let config = ResidentConfig::default();
        assert!(config.http.is_some());
        assert!(config.socket.is_none());
        assert!(config.validate_all().is_ok());
    }

    #[test]
    fn test_sample_parses_back() {
        let sample = ResidentConfig::generate_sample();
        let parsed: ResidentConfig = serde_yaml::from_str(&sample).unwrap();
        assert!(parsed.socket.is_some());
        assert!(parsed.validate_all().is_ok());
    }

    #[test]
    fn test_body_limit_must_fit_frame_limit() {
        let mut config = ResidentConfig::default();
        config.pool.max_frame_bytes = 1024 * 1024;
        let err = config.validate_all().unwrap_err();
        match err {
            ConfigError::DomainError { domain, message } => {
                assert_eq!(domain, "http");
                assert!(message.contains("max_frame_bytes"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let http = config.http.as_mut().unwrap();
        http.max_body_bytes = 512 * 1024;
        assert!(config.validate_all().is_ok());

        config.socket = Some(listener::ListenerConfig::socket_default());
        assert!(config.validate_all().is_err());
    }

    #[test]
    fn test_frame_bytes_for_body_covers_base64() {
        assert_eq!(pool::frame_bytes_for_body(0), pool::FRAME_HEADROOM_BYTES);
        assert_eq!(pool::frame_bytes_for_body(3), 4 + pool::FRAME_HEADROOM_BYTES);
        assert_eq!(pool::frame_bytes_for_body(4), 8 + pool::FRAME_HEADROOM_BYTES);
        assert_eq!(pool::frame_bytes_for_body(usize::MAX), usize::MAX);
    }
}
