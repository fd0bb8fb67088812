//! Graceful shutdown coordination
//!
//! Escalating shutdown signals shared between long-running tasks, task
//! tracking so the owner can wait for in-flight work, and escalating
//! termination of child processes.

use log::{error, info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::timeout;

/// Shutdown signal types with escalating urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownSignal {
    /// Stop accepting new work, let current work complete
    Graceful,
    /// Abandon current work immediately
    Forced,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Forced => write!(f, "forced"),
        }
    }
}

struct CoordinatorInner {
    sender: watch::Sender<Option<ShutdownSignal>>,
    active_tasks: AtomicUsize,
    idle: Notify,
}

/// Graceful shutdown coordinator
///
/// Cloning is cheap; all clones observe the same signal.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(None);
        Self {
            inner: Arc::new(CoordinatorInner {
                sender,
                active_tasks: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Subscribe to shutdown signals. The receiver sees the current value
    /// immediately, so late subscribers never miss a signal.
    pub fn subscribe(&self) -> watch::Receiver<Option<ShutdownSignal>> {
        self.inner.sender.subscribe()
    }

    /// Raise a signal. Signals only escalate; a weaker signal after a
    /// stronger one is ignored. Returns whether the signal changed.
    pub fn signal(&self, signal: ShutdownSignal) -> bool {
        let changed = self.inner.sender.send_if_modified(|current| match current {
            Some(existing) if *existing >= signal => false,
            _ => {
                *current = Some(signal);
                true
            }
        });
        if changed {
            info!("Shutdown signal raised: {}", signal);
        }
        changed
    }

    pub fn current(&self) -> Option<ShutdownSignal> {
        *self.inner.sender.borrow()
    }

    /// Check if shutdown is in progress
    pub fn is_shutting_down(&self) -> bool {
        self.current().is_some()
    }

    /// Resolve once a signal at least as strong as `signal` is raised
    pub async fn wait_for(&self, signal: ShutdownSignal) {
        let mut receiver = self.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = receiver
            .wait_for(|current| current.is_some_and(|s| s >= signal))
            .await;
    }

    /// Register an in-flight task; the returned guard unregisters on drop
    pub fn track(&self) -> TaskGuard {
        self.inner.active_tasks.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            inner: self.inner.clone(),
        }
    }

    /// Get current active task count
    pub fn active_task_count(&self) -> usize {
        self.inner.active_tasks.load(Ordering::SeqCst)
    }

    /// Wait for all tracked tasks to complete within the given timeout
    pub async fn wait_for_tasks(&self, timeout_duration: Duration) -> bool {
        let wait = async {
            loop {
                let notified = self.inner.idle.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.active_task_count() == 0 {
                    return;
                }
                notified.await;
            }
        };
        timeout(timeout_duration, wait).await.is_ok()
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Unregisters a tracked task when dropped
pub struct TaskGuard {
    inner: Arc<CoordinatorInner>,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        if self.inner.active_tasks.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

/// Failure signalling or reaping a process
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("Process error: {0}")]
    ProcessError(String),
}

/// Process shutdown manager for external processes
pub struct ProcessShutdownManager;

impl ProcessShutdownManager {
    /// Shutdown a process gracefully with escalating signals: SIGTERM, wait
    /// up to `graceful_timeout`, then SIGKILL.
    pub async fn shutdown_process(
        child: &mut tokio::process::Child,
        graceful_timeout: Duration,
    ) -> Result<std::process::ExitStatus, ShutdownError> {
        if let Ok(Some(status)) = child.try_wait() {
            return Ok(status);
        }

        if let Some(id) = child.id() {
            #[cfg(all(unix, feature = "shutdown"))]
            {
                use nix::sys::signal::{self, Signal};
                use nix::unistd::Pid;

                if let Err(e) = signal::kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
                    warn!("Failed to send SIGTERM to process {}: {}", id, e);
                }
            }

            #[cfg(not(all(unix, feature = "shutdown")))]
            {
                warn!("No graceful termination available for process {}", id);
            }
        }

        match timeout(graceful_timeout, child.wait()).await {
            Ok(Ok(status)) => return Ok(status),
            Ok(Err(e)) => error!("Error waiting for process: {}", e),
            Err(_) => warn!("Process did not terminate within {:?}", graceful_timeout),
        }

        if let Err(e) = child.kill().await {
            error!("Failed to kill process: {}", e);
            return Err(ShutdownError::ProcessError(e.to_string()));
        }

        match timeout(Duration::from_secs(5), child.wait()).await {
            Ok(Ok(status)) => Ok(status),
            Ok(Err(e)) => Err(ShutdownError::ProcessError(e.to_string())),
            Err(_) => Err(ShutdownError::ProcessError(
                "Process unresponsive to termination".to_string(),
            )),
        }
    }
}
