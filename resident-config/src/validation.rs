//! Configuration validation traits and utilities

use crate::error::{ConfigError, ConfigResult};
use std::net::SocketAddr;
use std::time::Duration;

/// Trait for validatable configuration
pub trait Validatable {
    /// Validate the configuration
    fn validate(&self) -> ConfigResult<()>;

    /// Get the domain name for error reporting
    fn domain_name(&self) -> &'static str;

    /// Helper to create a domain-specific validation error
    fn validation_error(&self, message: impl Into<String>) -> ConfigError {
        ConfigError::DomainError {
            domain: self.domain_name().to_string(),
            message: message.into(),
        }
    }
}

/// Validate a required string field
pub fn validate_required_string(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.trim().is_empty() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} cannot be empty", field_name),
        });
    }
    Ok(())
}

/// Validate a positive number
pub fn validate_positive<T>(value: T, field_name: &str, domain: &str) -> ConfigResult<()>
where
    T: PartialOrd + Default + std::fmt::Display,
{
    if value <= T::default() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be greater than 0, got {}", field_name, value),
        });
    }
    Ok(())
}

/// Validate a non-zero duration
pub fn validate_duration(value: Duration, field_name: &str, domain: &str) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} must be a non-zero duration", field_name),
        });
    }
    Ok(())
}

/// Validate a `host:port` socket address
pub fn validate_socket_addr(value: &str, field_name: &str, domain: &str) -> ConfigResult<()> {
    value
        .parse::<SocketAddr>()
        .map(|_| ())
        .map_err(|e| ConfigError::DomainError {
            domain: domain.to_string(),
            message: format!("{} '{}' is not a socket address: {}", field_name, value, e),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_positive() {
        assert!(validate_positive(1usize, "workers", "pool").is_ok());
        let err = validate_positive(0u64, "max_requests", "pool").unwrap_err();
        assert!(err.to_string().contains("max_requests must be greater than 0"));
    }

    #[test]
    fn test_validate_socket_addr() {
        assert!(validate_socket_addr("127.0.0.1:8080", "bind_address", "http").is_ok());
        assert!(validate_socket_addr("[::1]:0", "bind_address", "http").is_ok());
        assert!(validate_socket_addr("localhost", "bind_address", "http").is_err());
    }

    #[test]
    fn test_validate_duration() {
        assert!(validate_duration(Duration::from_millis(1), "interval", "supervisor").is_ok());
        assert!(validate_duration(Duration::ZERO, "interval", "supervisor").is_err());
    }

    #[test]
    fn test_required_string_rejects_blank() {
        assert!(validate_required_string("  ", "command", "pool").is_err());
        assert!(validate_required_string("php", "command", "pool").is_ok());
    }
}
