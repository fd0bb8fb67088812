//! Supervisor loop
//!
//! Runs on a fixed interval and on demand through [`SupervisorHandle`]. Each
//! tick kills stalled workers, samples memory, recycles idle workers past
//! their limits and reconciles the pool toward its desired size.

pub mod memory;
pub mod watch;

use std::collections::HashMap;
use std::time::Duration;

use resident_config::SupervisorConfig;
use resident_pool::{PoolError, PoolSnapshot, ReloadReport, RetireReason, WorkerId, WorkerPool, WorkerState};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use self::memory::MemorySampler;
use self::watch::WatchTable;

/// Time force-killed workers get to be reaped after the shutdown deadline
const REAP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Supervisor is no longer running")]
    Stopped,

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// Outcome of a graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Every worker exited before the grace deadline
    pub clean: bool,
    /// Workers killed at the deadline
    pub forced: usize,
    pub elapsed: Duration,
}

enum Command {
    Shutdown(oneshot::Sender<ShutdownReport>),
    Reload(oneshot::Sender<Result<ReloadReport, PoolError>>),
    Resize(usize, oneshot::Sender<usize>),
    Snapshot(oneshot::Sender<PoolSnapshot>),
}

/// Entry point for controlling a running [`Supervisor`]
#[derive(Clone)]
pub struct SupervisorHandle {
    commands: mpsc::Sender<Command>,
}

impl SupervisorHandle {
    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SupervisorError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| SupervisorError::Stopped)?;
        rx.await.map_err(|_| SupervisorError::Stopped)
    }

    /// Drain the pool and wait for it to empty, killing stragglers at the
    /// grace deadline. The supervisor stops afterwards.
    pub async fn shutdown(&self) -> Result<ShutdownReport, SupervisorError> {
        self.request(Command::Shutdown).await
    }

    /// Replace every worker with a fresh generation
    pub async fn reload(&self) -> Result<ReloadReport, SupervisorError> {
        Ok(self.request(Command::Reload).await??)
    }

    /// Change the desired pool size; returns the previous size
    pub async fn resize(&self, workers: usize) -> Result<usize, SupervisorError> {
        self.request(|tx| Command::Resize(workers, tx)).await
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, SupervisorError> {
        self.request(Command::Snapshot).await
    }
}

/// Health and convergence loop for one pool
pub struct Supervisor {
    pool: WorkerPool,
    watch: WatchTable,
    config: SupervisorConfig,
    sampler: MemorySampler,
    commands: mpsc::Receiver<Command>,
    degraded: bool,
}

impl Supervisor {
    /// Start the loop on the current runtime
    pub fn spawn(
        pool: WorkerPool,
        watch: WatchTable,
        config: SupervisorConfig,
    ) -> (SupervisorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(16);
        let supervisor = Self {
            pool,
            watch,
            config,
            sampler: MemorySampler::new(),
            commands: rx,
            degraded: false,
        };
        let task = tokio::spawn(supervisor.run());
        (SupervisorHandle { commands: tx }, task)
    }

    async fn run(mut self) {
        info!("Supervisor started, checking every {:?}", self.config.interval);
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick(),
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        let report = self.shutdown().await;
                        let _ = reply.send(report);
                        break;
                    }
                    Some(Command::Reload(reply)) => {
                        let pool = self.pool.clone();
                        let timeout = self.config.reload_timeout;
                        tokio::spawn(async move {
                            let _ = reply.send(pool.reload(timeout).await);
                        });
                    }
                    Some(Command::Resize(workers, reply)) => {
                        let _ = reply.send(self.pool.resize(workers));
                    }
                    Some(Command::Snapshot(reply)) => {
                        let _ = reply.send(self.pool.snapshot());
                    }
                    None => {
                        debug!("All supervisor handles dropped");
                        break;
                    }
                },
            }
        }

        info!("Supervisor stopped");
    }

    /// One health and convergence pass
    pub fn tick(&mut self) {
        let snapshot = self.pool.snapshot();
        self.watch.retain(|id| snapshot.worker(id).is_some());

        for id in self.watch.stalled(self.config.stall_threshold) {
            let busy = snapshot
                .worker(id)
                .is_some_and(|w| w.state == WorkerState::Busy);
            if busy {
                warn!(worker_id = %id, "No heartbeat for {:?}, killing worker", self.config.stall_threshold);
                self.watch.forget(id);
                self.pool.kill(id, "stalled");
            }
        }

        let pids: Vec<(WorkerId, u32)> = snapshot
            .workers
            .iter()
            .filter(|w| w.state.is_serving())
            .filter_map(|w| w.pid.map(|pid| (w.id, pid)))
            .collect();
        let memory: HashMap<WorkerId, u64> = self.sampler.sample(&pids).into_iter().collect();
        for (id, bytes) in &memory {
            self.pool.record_memory(*id, *bytes);
        }

        let limits = self.pool.config();
        for worker in snapshot.workers.iter().filter(|w| w.state == WorkerState::Idle) {
            let used = memory.get(&worker.id).copied().or(worker.memory_bytes);
            let reason = if limits.max_idle.is_some_and(|max| worker.idle() >= max) {
                Some(RetireReason::MaxIdle)
            } else if limits.max_ttl.is_some_and(|max| worker.uptime() >= max) {
                Some(RetireReason::MaxTtl)
            } else if let (Some(max), Some(used)) = (limits.max_memory_bytes(), used) {
                (used >= max).then_some(RetireReason::MaxMemory)
            } else {
                None
            };

            if let Some(reason) = reason {
                self.pool.recycle_idle(worker.id, reason);
            }
        }

        self.pool.reconcile();

        let degraded = self.pool.is_degraded();
        if degraded != self.degraded {
            if degraded {
                error!(
                    "Running with degraded capacity: {} of {} workers serving",
                    snapshot.serving(),
                    snapshot.desired
                );
            } else {
                info!("Worker pool back at full capacity");
            }
            self.degraded = degraded;
        }
    }

    async fn shutdown(&mut self) -> ShutdownReport {
        let started = Instant::now();
        info!("Graceful shutdown, waiting up to {:?} for workers", self.config.shutdown_grace);
        self.pool.begin_shutdown();

        let clean = self.pool.wait_empty(self.config.shutdown_grace).await;
        let forced = if clean {
            0
        } else {
            let forced = self.pool.force_kill_all();
            warn!("Shutdown grace expired, killed {} workers", forced);
            if !self.pool.wait_empty(REAP_TIMEOUT).await {
                error!("Workers still present after forced shutdown");
            }
            forced
        };

        let report = ShutdownReport {
            clean,
            forced,
            elapsed: started.elapsed(),
        };
        info!("Worker pool stopped in {:?}", report.elapsed);
        report
    }
}
