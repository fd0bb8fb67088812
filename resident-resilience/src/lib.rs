//! Resilience patterns for Resident
//!
//! Backoff for worker spawn retries, escalating termination of child
//! processes, and shutdown coordination between long-running tasks.

pub mod backoff;
pub mod shutdown;

// Re-export commonly used types
pub use backoff::{BackoffCalculator, RetryBudget};
pub use shutdown::{
    ProcessShutdownManager, ShutdownCoordinator, ShutdownError, ShutdownSignal, TaskGuard,
};
