//! OS process ownership for workers

use std::time::Duration;

use async_trait::async_trait;
use resident_resilience::ProcessShutdownManager;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tracing::{debug, warn};

use crate::state::WorkerId;

/// The process half of a worker, separate from its IPC channel
#[async_trait]
pub trait ProcessHandle: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait up to `grace` for a voluntary exit, then force it
    async fn terminate(&mut self, grace: Duration);

    /// Force the process down immediately
    async fn kill(&mut self);
}

/// A real child process
pub struct ChildProcess {
    worker: WorkerId,
    child: Child,
}

impl ChildProcess {
    pub fn new(worker: WorkerId, child: Child) -> Self {
        Self { worker, child }
    }
}

#[async_trait]
impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    async fn terminate(&mut self, grace: Duration) {
        match ProcessShutdownManager::shutdown_process(&mut self.child, grace).await {
            Ok(status) => debug!(worker_id = %self.worker, %status, "Worker exited"),
            Err(e) => warn!(worker_id = %self.worker, "Failed to stop worker: {}", e),
        }
    }

    async fn kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(worker_id = %self.worker, "Failed to kill worker: {}", e);
        }
    }
}

/// Forward a worker's stderr into our own log, line by line
pub fn forward_stderr(worker: WorkerId, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(worker_id = %worker, "{}", line),
                Ok(None) => break,
                Err(e) => {
                    debug!(worker_id = %worker, "Stopped reading worker stderr: {}", e);
                    break;
                }
            }
        }
    });
}
