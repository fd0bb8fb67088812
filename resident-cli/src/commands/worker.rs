//! Built-in demo application
//!
//! Echoes every request back. A few reserved targets make it useful for
//! smoke tests:
//! - `/__crash` exits without replying
//! - `/__fail` answers with an application error
//! - `/__sleep/{ms}` delays the answer

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use resident_ipc::{RequestFrame, ResponseFrame};
use resident_pool::spawner::WORKER_ID_ENV;
use resident_worker::{AppError, Application, WorkerRuntime};
use tracing::info;

pub struct EchoApp {
    worker_id: String,
    served: AtomicU64,
}

impl EchoApp {
    pub fn new(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            served: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Application for EchoApp {
    async fn boot(&self) -> Result<(), AppError> {
        info!(worker_id = %self.worker_id, pid = std::process::id(), "Echo worker booted");
        Ok(())
    }

    async fn handle(&self, request: RequestFrame) -> Result<ResponseFrame, AppError> {
        let path = request.path().to_string();
        match path.as_str() {
            "/__crash" => return Err(AppError::Fatal("crash requested".to_string())),
            "/__fail" => return Err(AppError::Failed("failure requested".to_string())),
            _ => {}
        }
        if let Some(ms) = path
            .strip_prefix("/__sleep/")
            .and_then(|ms| ms.parse::<u64>().ok())
        {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        let (content_type, body) = if request.body.is_empty() {
            (
                "text/plain; charset=utf-8".to_string(),
                format!("{} {}\n", request.method, request.target).into_bytes(),
            )
        } else {
            (
                request
                    .headers
                    .get("content-type")
                    .unwrap_or("application/octet-stream")
                    .to_string(),
                request.body,
            )
        };

        Ok(ResponseFrame::new(200)
            .with_header("content-type", content_type)
            .with_header("x-worker-id", self.worker_id.clone())
            .with_header("x-worker-pid", std::process::id().to_string())
            .with_header("x-worker-requests", served.to_string())
            .with_body(body))
    }
}

/// Serve the echo application over stdio until the manager lets go
pub async fn run(heartbeat_ms: u64) -> Result<()> {
    let worker_id = std::env::var(WORKER_ID_ENV).unwrap_or_else(|_| "standalone".to_string());
    let heartbeat = (heartbeat_ms > 0).then(|| Duration::from_millis(heartbeat_ms));

    let served = WorkerRuntime::new(EchoApp::new(worker_id.clone()))
        .with_heartbeat(heartbeat)
        .run_stdio()
        .await?;

    info!(worker_id = %worker_id, "Echo worker exiting after {} requests", served);
    Ok(())
}
