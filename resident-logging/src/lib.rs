//! Tracing initialisation for Resident
//!
//! The manager logs according to its [`LoggingConfig`](resident_config::LoggingConfig).
//! Worker processes always log to stderr because their stdout carries IPC
//! frames.

pub mod init;

pub use init::{build_filter, init_logging, init_worker_tracing};
