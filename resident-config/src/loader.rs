//! Configuration loading and environment variable handling

use crate::domains::listener::ListenerConfig;
use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::utils::parse_duration;
use crate::domains::ResidentConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "RESIDENT".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ResidentConfig> {
        let content = std::fs::read_to_string(path)?;
        self.from_yaml(&content)
    }

    /// Parse configuration from YAML text with environment overrides
    pub fn from_yaml(&self, content: &str) -> ConfigResult<ResidentConfig> {
        let mut config: ResidentConfig = serde_yaml::from_str(content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<ResidentConfig> {
        let mut config = ResidentConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<ResidentConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut ResidentConfig) -> ConfigResult<()> {
        self.apply_pool_overrides(&mut config.pool)?;
        self.apply_listener_overrides("HTTP_BIND", &mut config.http, ListenerConfig::http_default);
        self.apply_listener_overrides(
            "SOCKET_BIND",
            &mut config.socket,
            ListenerConfig::socket_default,
        );
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply pool config overrides
    fn apply_pool_overrides(
        &self,
        config: &mut crate::domains::pool::PoolConfig,
    ) -> ConfigResult<()> {
        if let Ok(workers) = self.get_env_var("WORKERS") {
            config.workers = workers
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid WORKERS: {}", e)))?;
        }

        if let Ok(command) = self.get_env_var("WORKER_COMMAND") {
            config.command = Some(command);
        }

        if let Ok(max_requests) = self.get_env_var("MAX_REQUESTS") {
            let max: u64 = max_requests
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid MAX_REQUESTS: {}", e)))?;
            config.max_requests = (max > 0).then_some(max);
        }

        if let Ok(timeout) = self.get_env_var("REQUEST_TIMEOUT") {
            config.request_timeout = parse_duration(&timeout)
                .map_err(|e| ConfigError::EnvError(format!("Invalid REQUEST_TIMEOUT: {}", e)))?;
        }

        Ok(())
    }

    /// A bind override enables the listener if the file left it out
    fn apply_listener_overrides(
        &self,
        name: &str,
        listener: &mut Option<ListenerConfig>,
        default: fn() -> ListenerConfig,
    ) {
        if let Ok(bind) = self.get_env_var(name) {
            listener.get_or_insert_with(default).bind_address = bind;
        }
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
