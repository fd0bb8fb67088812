//! The worker pool
//!
//! All bookkeeping lives behind one mutex. Bytes are only ever exchanged
//! with a worker through the [`WorkerChannel`] owned by whoever holds its
//! [`WorkerHandle`], so the lock is never held across I/O.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use resident_config::PoolConfig;
use resident_ipc::{IpcError, RequestFrame};
use resident_resilience::{BackoffCalculator, RetryBudget};
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::channel::{ExchangeOutcome, WorkerChannel};
use crate::error::{PoolError, PoolResult};
use crate::process::ProcessHandle;
use crate::snapshot::{PoolSnapshot, WorkerSnapshot};
use crate::spawner::{SpawnedWorker, WorkerSpawner};
use crate::state::{RetireReason, WorkerId, WorkerState};

/// How a request ended, as observed by the caller
#[derive(Debug, Clone)]
pub enum ReleaseOutcome {
    /// A response came back over an intact channel
    Success { memory_bytes: Option<u64> },
    /// The channel can no longer be trusted
    Failure { reason: String },
}

impl ReleaseOutcome {
    pub fn success() -> Self {
        ReleaseOutcome::Success { memory_bytes: None }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        ReleaseOutcome::Failure {
            reason: reason.into(),
        }
    }
}

/// Result of a completed reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub generation: u64,
    pub started: usize,
    pub retired: usize,
}

/// Exclusive use of one worker for one request
pub struct WorkerHandle {
    id: WorkerId,
    generation: u64,
    channel: Option<WorkerChannel>,
    in_flight: bool,
    pool: WorkerPool,
}

impl WorkerHandle {
    fn new(id: WorkerId, generation: u64, channel: WorkerChannel, pool: WorkerPool) -> Self {
        Self {
            id,
            generation,
            channel: Some(channel),
            in_flight: false,
            pool,
        }
    }

    pub fn id(&self) -> WorkerId {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Forward one request to the worker. If this future is dropped before
    /// it completes, the handle is released as a failure.
    pub async fn exchange<F>(
        &mut self,
        request: RequestFrame,
        on_heartbeat: F,
    ) -> Result<ExchangeOutcome, IpcError>
    where
        F: FnMut() + Send,
    {
        let channel = self.channel.as_mut().ok_or(IpcError::ConnectionClosed)?;
        self.in_flight = true;
        let result = channel.exchange(request, on_heartbeat).await;
        if result.is_ok() {
            self.in_flight = false;
        }
        result
    }

    /// Take the channel back without releasing anything
    fn disarm(&mut self) -> Option<WorkerChannel> {
        self.channel.take()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.take() {
            let finish = if self.in_flight {
                Finish::Failure("handle dropped with a request in flight".to_string())
            } else {
                Finish::Returned
            };
            self.pool.finish(self.id, channel, finish);
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

enum Finish {
    Success { memory_bytes: Option<u64> },
    /// Handed back unused
    Returned,
    Failure(String),
}

#[derive(Clone, Copy)]
enum Retirement {
    Drain,
    Kill,
}

struct WorkerEntry {
    state: WorkerState,
    generation: u64,
    started_at: Instant,
    last_activity: Instant,
    requests_served: u64,
    memory_bytes: Option<u64>,
    pid: Option<u32>,
    process: Option<Box<dyn ProcessHandle>>,
    /// Present only while the worker sits idle in the pool
    channel: Option<WorkerChannel>,
    /// Cuts a drain short
    kill_switch: Option<oneshot::Sender<()>>,
}

impl WorkerEntry {
    fn starting(generation: u64) -> Self {
        let now = Instant::now();
        Self {
            state: WorkerState::Starting,
            generation,
            started_at: now,
            last_activity: now,
            requests_served: 0,
            memory_bytes: None,
            pid: None,
            process: None,
            channel: None,
            kill_switch: None,
        }
    }
}

struct PoolState {
    workers: HashMap<WorkerId, WorkerEntry>,
    ready: VecDeque<WorkerId>,
    waiters: VecDeque<oneshot::Sender<WorkerHandle>>,
    desired: usize,
    generation: u64,
    pending_generation: Option<u64>,
    shutting_down: bool,
    degraded: bool,
    spawn_failures: u64,
    next_id: u64,
}

impl PoolState {
    fn serving_in(&self, generation: u64) -> usize {
        self.workers
            .values()
            .filter(|w| w.generation == generation && w.state.is_serving())
            .count()
    }

    fn parked_in(&self, generation: u64) -> usize {
        self.workers
            .values()
            .filter(|w| w.generation == generation && w.state == WorkerState::Idle)
            .count()
    }
}

struct PoolShared {
    config: PoolConfig,
    spawner: Arc<dyn WorkerSpawner>,
    state: Mutex<PoolState>,
    changed: Notify,
}

/// Fixed-capacity set of worker processes
#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

fn set_state(id: WorkerId, entry: &mut WorkerEntry, next: WorkerState) -> bool {
    if entry.state == next {
        return true;
    }
    if !entry.state.can_transition_to(next) {
        warn!(worker_id = %id, "Refusing transition {} -> {}", entry.state, next);
        return false;
    }
    debug!(worker_id = %id, "{} -> {}", entry.state, next);
    entry.state = next;
    true
}

fn spawn_detached<F>(future: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(future);
            true
        }
        Err(_) => false,
    }
}

impl WorkerPool {
    /// Create an empty pool. Nothing is spawned until [`WorkerPool::reconcile`].
    pub fn new(config: PoolConfig, spawner: Arc<dyn WorkerSpawner>) -> Self {
        let desired = config.workers;
        Self {
            shared: Arc::new(PoolShared {
                config,
                spawner,
                state: Mutex::new(PoolState {
                    workers: HashMap::new(),
                    ready: VecDeque::new(),
                    waiters: VecDeque::new(),
                    desired,
                    generation: 0,
                    pending_generation: None,
                    shutting_down: false,
                    degraded: false,
                    spawn_failures: 0,
                    next_id: 1,
                }),
                changed: Notify::new(),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    pub fn desired(&self) -> usize {
        self.shared.state.lock().desired
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.state.lock().shutting_down
    }

    pub fn is_degraded(&self) -> bool {
        self.shared.state.lock().degraded
    }

    /// Take an idle worker, waiting in FIFO order until `deadline`
    pub async fn acquire(&self, deadline: Instant) -> PoolResult<WorkerHandle> {
        let mut rx = {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return Err(PoolError::ShuttingDown);
            }

            while let Some(id) = state.ready.pop_front() {
                let Some(entry) = state.workers.get_mut(&id) else {
                    continue;
                };
                if entry.state != WorkerState::Idle {
                    continue;
                }
                let Some(channel) = entry.channel.take() else {
                    continue;
                };
                set_state(id, entry, WorkerState::Busy);
                entry.last_activity = Instant::now();
                return Ok(WorkerHandle::new(id, entry.generation, channel, self.clone()));
            }

            // Callers that timed out or went away leave closed senders behind
            state.waiters.retain(|waiter| !waiter.is_closed());
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            if !state.degraded {
                self.reconcile_locked(&mut state);
            }
            rx
        };

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(handle)) => Ok(handle),
            Ok(Err(_)) => Err(PoolError::ShuttingDown),
            Err(_) => {
                rx.close();
                // A worker may have been handed over just as the deadline hit
                rx.try_recv().map_err(|_| PoolError::PoolExhausted)
            }
        }
    }

    /// Return a worker with the outcome of its request
    pub fn release(&self, mut handle: WorkerHandle, outcome: ReleaseOutcome) {
        let Some(channel) = handle.disarm() else {
            return;
        };
        let finish = match outcome {
            ReleaseOutcome::Success { memory_bytes } => Finish::Success { memory_bytes },
            ReleaseOutcome::Failure { reason } => Finish::Failure(reason),
        };
        self.finish(handle.id, channel, finish);
    }

    fn finish(&self, id: WorkerId, channel: WorkerChannel, finish: Finish) {
        let mut state = self.shared.state.lock();
        let Some(entry) = state.workers.get_mut(&id) else {
            return;
        };
        if entry.state == WorkerState::Dead {
            return;
        }
        entry.last_activity = Instant::now();

        match finish {
            Finish::Success { memory_bytes } => {
                entry.requests_served += 1;
                if memory_bytes.is_some() {
                    entry.memory_bytes = memory_bytes;
                }
                self.settle(&mut state, id, channel);
            }
            Finish::Returned => self.settle(&mut state, id, channel),
            Finish::Failure(reason) => {
                warn!(worker_id = %id, "Worker failed: {}", reason);
                drop(channel);
                self.retire(&mut state, id, None, Retirement::Kill, &reason);
            }
        }

        self.reconcile_locked(&mut state);
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Decide whether a worker that just became free should keep serving
    fn retire_reason(&self, state: &PoolState, id: WorkerId) -> Option<RetireReason> {
        let config = &self.shared.config;
        let entry = state.workers.get(&id)?;

        if state.shutting_down {
            return Some(RetireReason::Shutdown);
        }
        if entry.state == WorkerState::Draining
            || entry.generation < state.generation
            || (entry.generation > state.generation
                && state.pending_generation != Some(entry.generation))
        {
            return Some(RetireReason::Reload);
        }
        if config.max_requests.is_some_and(|max| entry.requests_served >= max) {
            return Some(RetireReason::MaxRequests);
        }
        if let (Some(max), Some(used)) = (config.max_memory_bytes(), entry.memory_bytes) {
            if used >= max {
                return Some(RetireReason::MaxMemory);
            }
        }
        if config.max_ttl.is_some_and(|ttl| entry.started_at.elapsed() >= ttl) {
            return Some(RetireReason::MaxTtl);
        }
        if entry.generation == state.generation
            && state.serving_in(state.generation) > state.desired
        {
            return Some(RetireReason::Resize);
        }
        None
    }

    fn settle(&self, state: &mut PoolState, id: WorkerId, channel: WorkerChannel) {
        match self.retire_reason(state, id) {
            Some(reason) => {
                self.retire(state, id, Some(channel), Retirement::Drain, &reason.to_string())
            }
            None => self.make_idle(state, id, channel),
        }
    }

    /// Hand a free worker to the oldest live waiter, or queue it
    fn make_idle(&self, state: &mut PoolState, id: WorkerId, mut channel: WorkerChannel) {
        let pending = state.pending_generation;
        let Some(entry) = state.workers.get_mut(&id) else {
            return;
        };
        if !set_state(id, entry, WorkerState::Idle) {
            return;
        }
        entry.last_activity = Instant::now();

        // New generation workers wait for the switch-over
        if pending == Some(entry.generation) {
            entry.channel = Some(channel);
            return;
        }

        while let Some(waiter) = state.waiters.pop_front() {
            if waiter.is_closed() {
                continue;
            }
            let handle = WorkerHandle::new(id, entry.generation, channel, self.clone());
            match waiter.send(handle) {
                Ok(()) => {
                    set_state(id, entry, WorkerState::Busy);
                    return;
                }
                Err(mut handle) => match handle.disarm() {
                    Some(returned) => channel = returned,
                    None => return,
                },
            }
        }

        entry.channel = Some(channel);
        if !state.ready.contains(&id) {
            state.ready.push_back(id);
        }
    }

    fn retire(
        &self,
        state: &mut PoolState,
        id: WorkerId,
        channel: Option<WorkerChannel>,
        how: Retirement,
        reason: &str,
    ) {
        let Some(entry) = state.workers.get_mut(&id) else {
            return;
        };
        let next = match how {
            Retirement::Drain => WorkerState::Draining,
            Retirement::Kill => WorkerState::Dead,
        };
        if entry.state == next || !set_state(id, entry, next) {
            return;
        }

        let channel = channel.or_else(|| entry.channel.take());
        let process = entry.process.take();
        let draining = entry.kill_switch.take();
        state.ready.retain(|queued| *queued != id);

        match how {
            Retirement::Drain => info!(worker_id = %id, "Draining worker: {}", reason),
            Retirement::Kill => warn!(worker_id = %id, "Killing worker: {}", reason),
        }

        if let Some(switch) = draining {
            // A drain task owns the process already and removes the entry
            let _ = switch.send(());
            return;
        }

        let (switch_tx, switch_rx) = oneshot::channel();
        if matches!(how, Retirement::Drain) {
            if let Some(entry) = state.workers.get_mut(&id) {
                entry.kill_switch = Some(switch_tx);
            }
        }

        let pool = self.clone();
        let stop_timeout = self.shared.config.stop_timeout;
        let task = async move {
            match (how, process) {
                (Retirement::Kill, Some(mut process)) => {
                    drop(channel);
                    process.kill().await;
                }
                (Retirement::Drain, Some(mut process)) => {
                    let forced = {
                        let stop = async {
                            if let Some(channel) = channel {
                                channel.shutdown().await;
                            }
                            process.terminate(stop_timeout).await;
                        };
                        tokio::select! {
                            _ = stop => false,
                            Ok(()) = switch_rx => true,
                        }
                    };
                    if forced {
                        process.kill().await;
                    }
                }
                (_, None) => {
                    if let Some(channel) = channel {
                        channel.shutdown().await;
                    }
                }
            }
            pool.remove(id);
        };

        if !spawn_detached(task) {
            state.workers.remove(&id);
        }
    }

    fn remove(&self, id: WorkerId) {
        let mut state = self.shared.state.lock();
        if state.workers.remove(&id).is_some() {
            debug!(worker_id = %id, "Worker removed");
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Drive the current generation toward the desired size
    pub fn reconcile(&self) {
        let mut state = self.shared.state.lock();
        self.reconcile_locked(&mut state);
        drop(state);
        self.shared.changed.notify_waiters();
    }

    fn reconcile_locked(&self, state: &mut PoolState) {
        if state.shutting_down {
            return;
        }

        let generation = state.generation;
        let serving = state.serving_in(generation);

        for _ in serving..state.desired {
            self.start_slot(state, generation);
        }

        if serving > state.desired {
            let surplus: Vec<WorkerId> = state
                .ready
                .iter()
                .copied()
                .filter(|id| {
                    state
                        .workers
                        .get(id)
                        .is_some_and(|w| w.generation == generation)
                })
                .take(serving - state.desired)
                .collect();
            for id in surplus {
                self.retire(state, id, None, Retirement::Drain, &RetireReason::Resize.to_string());
            }
        }
    }

    fn start_slot(&self, state: &mut PoolState, generation: u64) {
        let id = WorkerId::new(state.next_id);
        state.next_id += 1;
        state.workers.insert(id, WorkerEntry::starting(generation));

        let pool = self.clone();
        if !spawn_detached(async move { pool.fill_slot(id).await }) {
            warn!(worker_id = %id, "No runtime available to start worker");
            state.workers.remove(&id);
        }
    }

    fn slot_wanted(&self, id: WorkerId) -> bool {
        self.shared
            .state
            .lock()
            .workers
            .get(&id)
            .is_some_and(|w| w.state == WorkerState::Starting)
    }

    /// Spawn and handshake one worker, retrying with backoff
    async fn fill_slot(self, id: WorkerId) {
        let retry = &self.shared.config.spawn_retry;
        let mut budget = RetryBudget::new(
            BackoffCalculator::exponential(retry.initial_delay, retry.max_delay, retry.multiplier),
            retry.max_attempts,
        );

        loop {
            if !self.slot_wanted(id) {
                self.remove(id);
                return;
            }

            match self.start_worker(id).await {
                Ok((channel, process)) => {
                    if let Some((channel, mut process)) = self.on_ready(id, channel, process) {
                        debug!(worker_id = %id, "Worker no longer wanted");
                        channel.shutdown().await;
                        process.terminate(self.shared.config.stop_timeout).await;
                        self.remove(id);
                    }
                    return;
                }
                Err(e) => {
                    warn!(worker_id = %id, attempt = budget.attempts() + 1, "Worker failed to start: {}", e);
                    match budget.record_failure() {
                        Some(delay) => tokio::time::sleep(delay).await,
                        None => {
                            self.on_spawn_exhausted(id, budget.attempts());
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn start_worker(
        &self,
        id: WorkerId,
    ) -> PoolResult<(WorkerChannel, Box<dyn ProcessHandle>)> {
        let SpawnedWorker {
            mut channel,
            mut process,
        } = self.shared.spawner.spawn(id).await?;

        match channel.handshake(self.shared.config.startup_timeout).await {
            Ok(reported_pid) => {
                debug!(worker_id = %id, reported_pid, "Handshake complete");
                Ok((channel, process))
            }
            Err(e) => {
                process.kill().await;
                Err(e)
            }
        }
    }

    /// Attach a started worker. Hands the pieces back if the slot was
    /// abandoned in the meantime.
    fn on_ready(
        &self,
        id: WorkerId,
        channel: WorkerChannel,
        process: Box<dyn ProcessHandle>,
    ) -> Option<(WorkerChannel, Box<dyn ProcessHandle>)> {
        let mut state = self.shared.state.lock();
        let Some(entry) = state
            .workers
            .get_mut(&id)
            .filter(|w| w.state == WorkerState::Starting)
        else {
            return Some((channel, process));
        };

        let now = Instant::now();
        entry.pid = process.pid();
        entry.process = Some(process);
        entry.started_at = now;
        entry.last_activity = now;
        info!(worker_id = %id, generation = entry.generation, pid = ?entry.pid, "Worker ready");

        if state.degraded {
            info!("Worker pool recovered from degraded capacity");
        }
        state.degraded = false;
        state.spawn_failures = 0;

        self.settle(&mut state, id, channel);
        drop(state);
        self.shared.changed.notify_waiters();
        None
    }

    fn on_spawn_exhausted(&self, id: WorkerId, attempts: u32) {
        let mut state = self.shared.state.lock();
        state.workers.remove(&id);
        if !state.shutting_down {
            state.degraded = true;
            state.spawn_failures += 1;
            error!(
                worker_id = %id,
                "Giving up on worker slot after {} attempts, pool is degraded", attempts
            );
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Force-terminate one worker and replace it
    pub fn kill(&self, id: WorkerId, reason: &str) -> bool {
        let mut state = self.shared.state.lock();
        let live = state
            .workers
            .get(&id)
            .is_some_and(|w| w.state != WorkerState::Dead);
        if live {
            self.retire(&mut state, id, None, Retirement::Kill, reason);
            self.reconcile_locked(&mut state);
        }
        drop(state);
        self.shared.changed.notify_waiters();
        live
    }

    /// Drain one idle worker and replace it. Busy workers are left alone.
    pub fn recycle_idle(&self, id: WorkerId, reason: RetireReason) -> bool {
        let mut state = self.shared.state.lock();
        let idle = state.ready.contains(&id)
            && state
                .workers
                .get(&id)
                .is_some_and(|w| w.state == WorkerState::Idle);
        if idle {
            self.retire(&mut state, id, None, Retirement::Drain, &reason.to_string());
            self.reconcile_locked(&mut state);
        }
        drop(state);
        self.shared.changed.notify_waiters();
        idle
    }

    pub fn record_memory(&self, id: WorkerId, bytes: u64) {
        if let Some(entry) = self.shared.state.lock().workers.get_mut(&id) {
            entry.memory_bytes = Some(bytes);
        }
    }

    /// Change the desired size; returns the previous one
    pub fn resize(&self, desired: usize) -> usize {
        let mut state = self.shared.state.lock();
        let previous = std::mem::replace(&mut state.desired, desired);
        if previous != desired {
            info!("Resizing worker pool from {} to {}", previous, desired);
        }
        self.reconcile_locked(&mut state);
        drop(state);
        self.shared.changed.notify_waiters();
        previous
    }

    /// Stop handing out workers and drain the idle ones. Busy workers drain
    /// when released.
    pub fn begin_shutdown(&self) {
        let mut state = self.shared.state.lock();
        if state.shutting_down {
            return;
        }
        info!("Worker pool shutting down");
        state.shutting_down = true;
        state.pending_generation = None;
        // Dropped senders wake every waiter with ShuttingDown
        state.waiters.clear();

        let quiet: Vec<WorkerId> = state
            .workers
            .iter()
            .filter(|(_, w)| matches!(w.state, WorkerState::Idle | WorkerState::Starting))
            .map(|(id, _)| *id)
            .collect();
        for id in quiet {
            self.retire(&mut state, id, None, Retirement::Drain, &RetireReason::Shutdown.to_string());
        }
        drop(state);
        self.shared.changed.notify_waiters();
    }

    /// Kill everything still alive; returns how many workers were hit
    pub fn force_kill_all(&self) -> usize {
        let mut state = self.shared.state.lock();
        let alive: Vec<WorkerId> = state
            .workers
            .iter()
            .filter(|(_, w)| w.state != WorkerState::Dead)
            .map(|(id, _)| *id)
            .collect();
        for id in &alive {
            self.retire(&mut state, *id, None, Retirement::Kill, "shutdown deadline reached");
        }
        drop(state);
        self.shared.changed.notify_waiters();
        alive.len()
    }

    /// Wait until every worker process is gone
    pub async fn wait_empty(&self, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.workers.is_empty()).await
    }

    /// Wait until at least `count` workers sit in the ready-queue
    pub async fn wait_for_ready(&self, count: usize, timeout: Duration) -> bool {
        self.wait_until(timeout, |state| state.ready.len() >= count).await
    }

    async fn wait_until<F>(&self, timeout: Duration, predicate: F) -> bool
    where
        F: Fn(&PoolState) -> bool,
    {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.shared.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let done = predicate(&self.shared.state.lock());
            if done {
                return true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let done = predicate(&self.shared.state.lock());
                return done;
            }
        }
    }

    /// Bring up a complete new generation and switch to it. The current
    /// generation keeps serving until the switch; if the new one is not
    /// ready within `timeout` it is discarded.
    pub async fn reload(&self, timeout: Duration) -> PoolResult<ReloadReport> {
        let (next, wanted) = {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return Err(PoolError::ShuttingDown);
            }
            if state.pending_generation.is_some() {
                return Err(PoolError::ReloadInProgress);
            }
            let next = state.generation + 1;
            state.pending_generation = Some(next);
            let wanted = state.desired;
            for _ in 0..wanted {
                self.start_slot(&mut state, next);
            }
            (next, wanted)
        };
        info!("Reloading: starting generation {} with {} workers", next, wanted);

        self.wait_until(timeout, |state| {
            state.pending_generation != Some(next)
                || state.parked_in(next) >= wanted
                || state.serving_in(next) < wanted
        })
        .await;

        let mut state = self.shared.state.lock();
        let parked = state.parked_in(next);

        if state.pending_generation != Some(next) || parked < wanted {
            if state.pending_generation == Some(next) {
                state.pending_generation = None;
            }
            let abandoned: Vec<WorkerId> = state
                .workers
                .iter()
                .filter(|(_, w)| w.generation == next && w.state.is_serving())
                .map(|(id, _)| *id)
                .collect();
            for id in abandoned {
                self.retire(&mut state, id, None, Retirement::Drain, "reload aborted");
            }
            drop(state);
            self.shared.changed.notify_waiters();
            error!("Reload aborted: {} of {} workers ready", parked, wanted);
            return Err(PoolError::ReloadFailed(format!(
                "{} of {} workers ready within {:?}",
                parked, wanted, timeout
            )));
        }

        let previous = state.generation;
        state.generation = next;
        state.pending_generation = None;

        let stale: Vec<WorkerId> = state
            .ready
            .iter()
            .copied()
            .filter(|id| state.workers.get(id).is_some_and(|w| w.generation < next))
            .collect();
        let retired = stale.len();
        for id in stale {
            self.retire(&mut state, id, None, Retirement::Drain, &RetireReason::Reload.to_string());
        }

        let fresh: Vec<WorkerId> = state
            .workers
            .iter()
            .filter(|(_, w)| w.generation == next && w.state == WorkerState::Idle)
            .map(|(id, _)| *id)
            .collect();
        for id in fresh {
            let channel = state.workers.get_mut(&id).and_then(|w| w.channel.take());
            if let Some(channel) = channel {
                self.make_idle(&mut state, id, channel);
            }
        }

        drop(state);
        self.shared.changed.notify_waiters();
        info!("Reload complete: generation {} replaced {}", next, previous);

        Ok(ReloadReport {
            generation: next,
            started: wanted,
            retired,
        })
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let state = self.shared.state.lock();
        let now = Instant::now();
        let mut workers: Vec<WorkerSnapshot> = state
            .workers
            .iter()
            .map(|(id, w)| WorkerSnapshot {
                id: *id,
                pid: w.pid,
                state: w.state,
                generation: w.generation,
                requests_served: w.requests_served,
                uptime_ms: now.duration_since(w.started_at).as_millis() as u64,
                idle_ms: now.duration_since(w.last_activity).as_millis() as u64,
                memory_bytes: w.memory_bytes,
            })
            .collect();
        workers.sort_by_key(|w| w.id);

        PoolSnapshot {
            desired: state.desired,
            generation: state.generation,
            pending_generation: state.pending_generation,
            shutting_down: state.shutting_down,
            degraded: state.degraded,
            spawn_failures: state.spawn_failures,
            ready: state.ready.len(),
            waiting: state.waiters.iter().filter(|w| !w.is_closed()).count(),
            workers,
        }
    }
}
