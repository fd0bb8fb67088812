//! Application seam implemented by the code a worker hosts

use async_trait::async_trait;
use resident_ipc::{RequestFrame, ResponseFrame};
use thiserror::Error;

/// Errors an application can return from [`Application::handle`]
#[derive(Debug, Error)]
pub enum AppError {
    /// The request failed; the worker stays usable
    #[error("{0}")]
    Failed(String),

    /// The worker's state is no longer trustworthy and it must exit without
    /// answering
    #[error("fatal: {0}")]
    Fatal(String),
}

/// Long-lived application hosted by a worker process.
///
/// The process stays resident between requests, so anything request-scoped
/// has to be cleared in [`reset`](Application::reset); the manager only
/// guarantees isolation between processes, not between requests.
#[async_trait]
pub trait Application: Send + Sync + 'static {
    /// One-time initialisation before the worker reports ready
    async fn boot(&self) -> Result<(), AppError> {
        Ok(())
    }

    /// Handle a single request
    async fn handle(&self, request: RequestFrame) -> Result<ResponseFrame, AppError>;

    /// Clear request-scoped state before the worker goes back to idle
    async fn reset(&self) {}
}
