//! Listener configuration, shared by the HTTP and raw socket transports

use crate::error::ConfigResult;
use crate::validation::{validate_duration, validate_positive, validate_socket_addr, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// `host:port` to bind
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Concurrent connections (socket) or in-flight requests (HTTP)
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Requests with a larger body are rejected before dispatch
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    #[serde(default = "default_read_timeout", with = "humantime_serde")]
    pub read_timeout: Duration,

    #[serde(default = "default_write_timeout", with = "humantime_serde")]
    pub write_timeout: Duration,

    /// Path answered by the listener itself with pool status (HTTP only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_path: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            max_connections: default_max_connections(),
            max_body_bytes: default_max_body_bytes(),
            read_timeout: default_read_timeout(),
            write_timeout: default_write_timeout(),
            health_path: None,
        }
    }
}

impl ListenerConfig {
    pub fn http_default() -> Self {
        Self {
            health_path: Some("/_resident/health".to_string()),
            ..Default::default()
        }
    }

    pub fn socket_default() -> Self {
        Self {
            bind_address: "127.0.0.1:9090".to_string(),
            ..Default::default()
        }
    }
}

impl Validatable for ListenerConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_socket_addr(&self.bind_address, "bind_address", self.domain_name())?;
        validate_positive(self.max_connections, "max_connections", self.domain_name())?;
        validate_positive(self.max_body_bytes, "max_body_bytes", self.domain_name())?;
        validate_duration(self.read_timeout, "read_timeout", self.domain_name())?;
        validate_duration(self.write_timeout, "write_timeout", self.domain_name())?;

        if let Some(path) = &self.health_path {
            if !path.starts_with('/') {
                return Err(self.validation_error(format!(
                    "health_path must start with '/', got '{}'",
                    path
                )));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "listener"
    }
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_body_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listener_defaults() {
        let http = ListenerConfig::http_default();
        assert_eq!(http.bind_address, "127.0.0.1:8080");
        assert_eq!(http.health_path.as_deref(), Some("/_resident/health"));
        assert!(http.validate().is_ok());

        let socket = ListenerConfig::socket_default();
        assert!(socket.health_path.is_none());
        assert!(socket.validate().is_ok());
    }

    #[test]
    fn test_listener_validation() {
        let mut config = ListenerConfig::default();
        config.bind_address = "not-an-address".to_string();
        assert!(config.validate().is_err());

        let mut config = ListenerConfig::default();
        config.max_body_bytes = 0;
        assert!(config.validate().is_err());

        let mut config = ListenerConfig::default();
        config.health_path = Some("health".to_string());
        assert!(config.validate().is_err());
    }
}
