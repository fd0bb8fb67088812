//! Inbound transports
//!
//! Every listener binds eagerly so its address is known before serving, then
//! serves until the shutdown coordinator raises a signal.

pub mod http;
pub mod socket;

use std::net::SocketAddr;

use async_trait::async_trait;
use resident_ipc::ResponseFrame;
use resident_resilience::ShutdownCoordinator;
use tokio::net::TcpListener;

use crate::error::{DispatchError, ServerError};

#[async_trait]
pub trait Listener: Send {
    /// Short transport name used in logs
    fn name(&self) -> &'static str;

    fn local_addr(&self) -> SocketAddr;

    /// Serve until `shutdown` fires
    async fn serve(self: Box<Self>, shutdown: ShutdownCoordinator) -> Result<(), ServerError>;
}

pub(crate) async fn bind(address: &str) -> Result<(TcpListener, SocketAddr), ServerError> {
    let listener = TcpListener::bind(address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.to_string(),
            source,
        })?;
    let local = listener.local_addr()?;
    Ok((listener, local))
}

/// Render a dispatch failure as a response frame
pub(crate) fn error_frame(error: &DispatchError) -> ResponseFrame {
    ResponseFrame::new(error.status_code())
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(error.to_string().into_bytes())
}
