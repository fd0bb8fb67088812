//! Worker identity and lifecycle states

use serde::Serialize;
use std::fmt;

/// Opaque worker identity, unique for the lifetime of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct WorkerId(u64);

impl WorkerId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Worker lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Spawned, waiting for the ready reply
    Starting,
    /// In the ready-queue
    Idle,
    /// Holding exactly one in-flight request
    Busy,
    /// Retiring; exits once its current work is done
    Draining,
    /// Crashed, timed out or killed; removed once the process is reaped
    Dead,
}

impl WorkerState {
    /// Whether `next` is a legal successor of this state
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Starting, Idle)
                | (Starting, Draining)
                | (Starting, Dead)
                | (Idle, Busy)
                | (Idle, Draining)
                | (Idle, Dead)
                | (Busy, Idle)
                | (Busy, Draining)
                | (Busy, Dead)
                | (Draining, Dead)
        )
    }

    /// Counts toward the pool's desired size
    pub fn is_serving(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Idle | WorkerState::Busy)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Starting => "starting",
            WorkerState::Idle => "idle",
            WorkerState::Busy => "busy",
            WorkerState::Draining => "draining",
            WorkerState::Dead => "dead",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a worker is being retired
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RetireReason {
    MaxRequests,
    MaxMemory,
    MaxTtl,
    MaxIdle,
    Reload,
    Resize,
    Shutdown,
}

impl fmt::Display for RetireReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetireReason::MaxRequests => "max requests reached",
            RetireReason::MaxMemory => "memory threshold reached",
            RetireReason::MaxTtl => "time to live reached",
            RetireReason::MaxIdle => "idle too long",
            RetireReason::Reload => "replaced by reload",
            RetireReason::Resize => "pool shrunk",
            RetireReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use WorkerState::*;

    #[test]
    fn test_lifecycle_transitions() {
        assert!(Starting.can_transition_to(Idle));
        assert!(Idle.can_transition_to(Busy));
        assert!(Busy.can_transition_to(Idle));
        assert!(Busy.can_transition_to(Draining));
        assert!(Draining.can_transition_to(Dead));
    }

    #[test]
    fn test_illegal_transitions() {
        assert!(!Dead.can_transition_to(Idle));
        assert!(!Dead.can_transition_to(Starting));
        assert!(!Draining.can_transition_to(Idle));
        assert!(!Draining.can_transition_to(Busy));
        assert!(!Starting.can_transition_to(Busy));
        assert!(!Idle.can_transition_to(Idle));
    }

    #[test]
    fn test_serving_states() {
        assert!(Starting.is_serving());
        assert!(Busy.is_serving());
        assert!(!Draining.is_serving());
        assert!(!Dead.is_serving());
    }

    #[test]
    fn test_worker_id_display() {
        assert_eq!(WorkerId::new(7).to_string(), "worker-7");
    }
}
