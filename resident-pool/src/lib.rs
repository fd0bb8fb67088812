//! Worker process lifecycle and pool management for Resident
//!
//! The pool is the only owner of worker state. Callers interact through
//! [`WorkerPool::acquire`], [`WorkerPool::release`] and
//! [`WorkerPool::resize`], and receive [`WorkerHandle`]s that grant
//! exclusive use of one worker's channel for a single request.

pub mod channel;
pub mod error;
pub mod pool;
pub mod process;
pub mod snapshot;
pub mod spawner;
pub mod state;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use channel::{ExchangeOutcome, WorkerChannel};
pub use error::{PoolError, PoolResult};
pub use pool::{ReleaseOutcome, ReloadReport, WorkerHandle, WorkerPool};
pub use process::{ChildProcess, ProcessHandle};
pub use snapshot::{PoolSnapshot, WorkerSnapshot};
pub use spawner::{CommandSpawner, SpawnedWorker, WorkerSpawner};
pub use state::{RetireReason, WorkerId, WorkerState};
