//! Error types for pool operations

use resident_ipc::IpcError;
use thiserror::Error;

pub type PoolResult<T> = Result<T, PoolError>;

/// Pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("No worker became available before the deadline")]
    PoolExhausted,

    #[error("Pool is shutting down")]
    ShuttingDown,

    #[error("Failed to spawn worker: {0}")]
    SpawnFailure(String),

    #[error("Worker handshake failed: {0}")]
    Handshake(String),

    #[error("A reload is already in progress")]
    ReloadInProgress,

    #[error("Reload failed: {0}")]
    ReloadFailed(String),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),
}
