//! Inter-process communication for Resident
//!
//! This crate provides the wire protocol and transport used between the
//! manager process and its long-lived worker processes.

pub mod error;
pub mod headers;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use headers::Headers;
pub use protocol::{
    ManagerMessage, MessageEnvelope, RequestFrame, ResponseFrame, WorkerError, WorkerReply,
    ENVELOPE_OVERHEAD_BYTES, IPC_PROTOCOL_VERSION,
};
pub use transport::{
    BoxedTransport, ChildProcessTransport, FramedTransport, IpcTransport, StdioTransport,
    frame_limit_from, DEFAULT_MAX_FRAME_BYTES, MAX_FRAME_BYTES_ENV,
};
