//! Worker-side runtime for Resident
//!
//! A worker process boots its application once, answers the manager's
//! readiness probe and then serves requests one at a time over stdio until
//! it is told to shut down or its stdin closes.

pub mod app;
pub mod memory;
pub mod runtime;

pub use app::{AppError, Application};
pub use runtime::{RuntimeError, WorkerRuntime};
