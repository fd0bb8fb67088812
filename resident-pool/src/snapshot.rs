//! Read-only view of the pool

use serde::Serialize;
use std::time::Duration;

use crate::state::{WorkerId, WorkerState};

/// Point-in-time copy of the pool's bookkeeping
#[derive(Debug, Clone, Serialize)]
pub struct PoolSnapshot {
    pub desired: usize,
    pub generation: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_generation: Option<u64>,
    pub shutting_down: bool,
    pub degraded: bool,
    pub spawn_failures: u64,
    /// Workers in the ready-queue
    pub ready: usize,
    /// Callers queued in `acquire`
    pub waiting: usize,
    pub workers: Vec<WorkerSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub state: WorkerState,
    pub generation: u64,
    pub requests_served: u64,
    pub uptime_ms: u64,
    /// Time since the worker last started or finished a request
    pub idle_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
}

impl PoolSnapshot {
    pub fn count(&self, state: WorkerState) -> usize {
        self.workers.iter().filter(|w| w.state == state).count()
    }

    /// Workers counting toward the desired size
    pub fn serving(&self) -> usize {
        self.workers.iter().filter(|w| w.state.is_serving()).count()
    }

    pub fn worker(&self, id: WorkerId) -> Option<&WorkerSnapshot> {
        self.workers.iter().find(|w| w.id == id)
    }
}

impl WorkerSnapshot {
    pub fn uptime(&self) -> Duration {
        Duration::from_millis(self.uptime_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }
}
