//! In-memory workers for tests
//!
//! [`FakeSpawner`] runs the real worker runtime inside a tokio task and
//! connects it to the pool through duplex pipes, so pool behaviour can be
//! exercised without starting OS processes.
//!
//! The scripted application understands a few targets:
//! - `/crash` exits the worker without replying
//! - `/fail` answers with an application error
//! - `/hang` never answers
//! - `/sleep/{ms}` answers after the given delay
//!
//! Anything else is echoed back with an `x-worker` header naming the worker.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use resident_ipc::{BoxedTransport, RequestFrame, ResponseFrame};
use resident_worker::{AppError, Application, WorkerRuntime};
use tokio::task::JoinHandle;

use crate::channel::WorkerChannel;
use crate::error::PoolError;
use crate::process::ProcessHandle;
use crate::spawner::{SpawnedWorker, WorkerSpawner};
use crate::state::WorkerId;

/// Spawner producing in-process workers
#[derive(Default)]
pub struct FakeSpawner {
    fail_next: AtomicUsize,
    unresponsive: AtomicBool,
    spawned: AtomicUsize,
    live: Arc<AtomicUsize>,
    heartbeat: Option<Duration>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit heartbeat frames at this interval while requests run
    pub fn with_heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = Some(interval);
        self
    }

    /// Make the next `count` spawn attempts fail
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// New workers never answer their readiness probe
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.unresponsive.store(unresponsive, Ordering::SeqCst);
    }

    /// Spawn attempts so far, failed ones included
    pub fn spawn_count(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Workers whose task is still running
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerSpawner for FakeSpawner {
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, PoolError> {
        self.spawned.fetch_add(1, Ordering::SeqCst);
        if self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(PoolError::SpawnFailure("injected spawn failure".to_string()));
        }

        let (manager_end, worker_end) = tokio::io::duplex(1024 * 1024);
        let (m_read, m_write) = tokio::io::split(manager_end);
        let (w_read, w_write) = tokio::io::split(worker_end);

        let guard = LiveGuard::new(self.live.clone());
        let unresponsive = self.unresponsive.load(Ordering::SeqCst);
        let heartbeat = self.heartbeat;

        let task = tokio::spawn(async move {
            let _guard = guard;
            let transport = BoxedTransport::boxed(w_read, w_write);
            if unresponsive {
                let _transport = transport;
                std::future::pending::<()>().await;
                return;
            }
            let runtime = WorkerRuntime::new(ScriptApp { id })
                .with_heartbeat(heartbeat)
                .with_memory_reporting(false);
            let _ = runtime.serve(transport).await;
        });

        Ok(SpawnedWorker {
            channel: WorkerChannel::new(id, BoxedTransport::boxed(m_read, m_write)),
            process: Box::new(FakeProcess { task }),
        })
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct FakeProcess {
    task: JoinHandle<()>,
}

#[async_trait]
impl ProcessHandle for FakeProcess {
    fn pid(&self) -> Option<u32> {
        None
    }

    async fn terminate(&mut self, grace: Duration) {
        if self.task.is_finished() {
            return;
        }
        if tokio::time::timeout(grace, &mut self.task).await.is_err() {
            self.kill().await;
        }
    }

    async fn kill(&mut self) {
        if self.task.is_finished() {
            return;
        }
        self.task.abort();
        let _ = (&mut self.task).await;
    }
}

struct ScriptApp {
    id: WorkerId,
}

#[async_trait]
impl Application for ScriptApp {
    async fn handle(&self, request: RequestFrame) -> Result<ResponseFrame, AppError> {
        let path = request.path().to_string();
        match path.as_str() {
            "/crash" => return Err(AppError::Fatal("crash requested".to_string())),
            "/fail" => return Err(AppError::Failed("failure requested".to_string())),
            "/hang" => std::future::pending::<()>().await,
            _ => {}
        }

        if let Some(ms) = path.strip_prefix("/sleep/").and_then(|ms| ms.parse::<u64>().ok()) {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }

        Ok(ResponseFrame::new(200)
            .with_header("x-worker", self.id.to_string())
            .with_body(request.body))
    }
}
