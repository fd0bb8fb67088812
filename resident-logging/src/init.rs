use anyhow::Result;
use resident_config::{LogFormat, LoggingConfig};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Resolve the filter: an explicit level wins, then `RUST_LOG`, then the
/// configured level.
pub fn build_filter(config: &LoggingConfig, override_level: Option<&str>) -> EnvFilter {
    if let Some(level) = override_level {
        match EnvFilter::try_new(level) {
            Ok(filter) => return filter,
            Err(_) => eprintln!("Invalid log level '{}', ignoring", level),
        }
    }

    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.level.as_str()))
}

/// Initialize logging for the manager process from configuration
pub fn init_logging(config: &LoggingConfig, override_level: Option<&str>) -> Result<()> {
    let filter = build_filter(config, override_level);
    let location = config.include_location;

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_file(location)
                    .with_line_number(location)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Compact => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .compact()
                    .with_file(location)
                    .with_line_number(location)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(location)
                    .with_line_number(location)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_file(location)
                    .with_line_number(location)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
    };

    // Use try_init semantics: a subscriber installed earlier (tests, embedding) wins
    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize tracing inside a worker process
pub fn init_worker_tracing(log_level: Option<&str>) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level).unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", level);
            EnvFilter::new("info")
        }),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    // Worker processes output to stderr to avoid conflicts with IPC on stdout
    if tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use resident_config::LogLevel;

    #[test]
    fn test_override_level_wins() {
        let config = LoggingConfig {
            level: LogLevel::Error,
            ..Default::default()
        };
        let filter = build_filter(&config, Some("debug"));
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_invalid_override_falls_back() {
        let config = LoggingConfig::default();
        let filter = build_filter(&config, Some("not=a=level[["));
        assert!(!filter.to_string().is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config, Some("warn")).is_ok());
        assert!(init_logging(&config, Some("warn")).is_ok());
        assert!(init_worker_tracing(Some("info")).is_ok());
    }
}
