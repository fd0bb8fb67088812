//! IPC error types

use crate::protocol::WorkerError;
use thiserror::Error;

/// IPC error types
#[derive(Debug, Error)]
pub enum IpcError {
    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// The peer closed its end of the channel
    #[error("Connection closed")]
    ConnectionClosed,

    /// Protocol version mismatch
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    ProtocolVersionMismatch { expected: u32, actual: u32 },

    /// A single frame exceeded the configured limit
    #[error("Frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    /// Timeout waiting for a reply
    #[error("Timeout waiting for response")]
    Timeout,

    /// A reply carried a sequence number other than the one in flight
    #[error("Sequence mismatch: expected {expected}, got {actual}")]
    SequenceMismatch { expected: u64, actual: u64 },

    /// Worker error
    #[error("Worker error: {0}")]
    WorkerError(WorkerError),

    /// A well-formed frame that is not valid at this point of the exchange
    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),
}

impl IpcError {
    /// Whether the error means the peer went away
    pub fn is_disconnect(&self) -> bool {
        matches!(self, IpcError::IoError(_) | IpcError::ConnectionClosed)
    }

    /// Whether the channel can no longer be trusted to stay in sync
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IpcError::ProtocolVersionMismatch { .. }
                | IpcError::SequenceMismatch { .. }
                | IpcError::UnexpectedMessage(_)
                | IpcError::FrameTooLarge { .. }
                | IpcError::DeserializationError(_)
        )
    }
}

impl From<std::io::Error> for IpcError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::BrokenPipe {
            IpcError::ConnectionClosed
        } else {
            IpcError::IoError(err.to_string())
        }
    }
}

impl From<serde_json::Error> for IpcError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            IpcError::IoError(err.to_string())
        } else if err.is_data() || err.is_syntax() || err.is_eof() {
            IpcError::DeserializationError(err.to_string())
        } else {
            IpcError::SerializationError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_disconnect() {
        assert!(IpcError::IoError("reset".to_string()).is_disconnect());
        assert!(IpcError::ConnectionClosed.is_disconnect());
        assert!(!IpcError::Timeout.is_disconnect());
        assert!(!IpcError::SequenceMismatch { expected: 1, actual: 2 }.is_disconnect());
    }

    #[test]
    fn test_error_fatal() {
        assert!(IpcError::ProtocolVersionMismatch { expected: 1, actual: 2 }.is_fatal());
        assert!(IpcError::SequenceMismatch { expected: 3, actual: 2 }.is_fatal());
        assert!(IpcError::FrameTooLarge { limit: 10 }.is_fatal());
        assert!(!IpcError::ConnectionClosed.is_fatal());
        assert!(!IpcError::Timeout.is_fatal());
    }

    #[test]
    fn test_broken_pipe_is_closed() {
        let err: IpcError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }
}
