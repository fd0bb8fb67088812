//! Error types for the server crate

use resident_pool::PoolError;
use thiserror::Error;

/// Why a request did not produce a worker response
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("No worker available before the deadline")]
    ServiceUnavailable,

    #[error("Server is shutting down")]
    ShuttingDown,

    #[error("Worker failed while handling the request: {0}")]
    WorkerCrashed(String),

    #[error("Application error: {0}")]
    Application(String),

    #[error("Worker did not answer before the deadline")]
    GatewayTimeout,

    #[error("Request deadline already passed")]
    DeadlineExceeded,

    #[error("Request needs {size} bytes on the worker channel, the limit is {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
}

impl DispatchError {
    /// HTTP status used to report this error
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::ServiceUnavailable | DispatchError::ShuttingDown => 503,
            DispatchError::WorkerCrashed(_) | DispatchError::Application(_) => 500,
            DispatchError::GatewayTimeout | DispatchError::DeadlineExceeded => 504,
            DispatchError::PayloadTooLarge { .. } => 413,
        }
    }
}

impl From<PoolError> for DispatchError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::ShuttingDown => DispatchError::ShuttingDown,
            _ => DispatchError::ServiceUnavailable,
        }
    }
}

/// Startup and listener errors
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Configuration error: {0}")]
    Config(#[from] resident_config::ConfigError),

    #[error("Supervisor error: {0}")]
    Supervisor(#[from] crate::supervisor::SupervisorError),
}
