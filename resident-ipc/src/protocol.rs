//! IPC protocol definitions and message types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::headers::Headers;

/// IPC protocol version for compatibility checking
pub const IPC_PROTOCOL_VERSION: u32 = 1;

/// Bytes a request envelope adds around the request fields themselves
pub const ENVELOPE_OVERHEAD_BYTES: usize = 256;

/// A request as forwarded to a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub method: String,
    pub target: String,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl RequestFrame {
    pub fn new(method: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            target: target.into(),
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    /// Path component of the target, without query string
    pub fn path(&self) -> &str {
        self.target.split('?').next().unwrap_or_default()
    }

    /// Upper bound on the size of this request once framed for a worker
    pub fn encoded_len(&self) -> usize {
        let headers: usize = self
            .headers
            .iter()
            .map(|(name, value)| json_string_len(name) + json_string_len(value) + 4)
            .sum();
        ENVELOPE_OVERHEAD_BYTES
            + json_string_len(&self.method)
            + json_string_len(&self.target)
            + headers
            + self.body.len().div_ceil(3) * 4
    }
}

fn json_string_len(text: &str) -> usize {
    let escaped: usize = text
        .chars()
        .map(|c| match c {
            '"' | '\\' => 2,
            c if (c as u32) < 0x20 => 6,
            c => c.len_utf8(),
        })
        .sum();
    escaped + 2
}

/// A response as produced by a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub status: u16,
    #[serde(default)]
    pub headers: Headers,
    #[serde(default, with = "base64_body")]
    pub body: Vec<u8>,
}

impl ResponseFrame {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Vec::new(),
        }
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }
}

/// Messages sent from the manager to a worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ManagerMessage {
    /// Readiness probe sent once after spawn
    Probe { token: Uuid },

    /// Handle one request
    Request { seq: u64, request: RequestFrame },

    /// Finish and exit
    Shutdown,
}

/// Messages sent from a worker process to the manager
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerReply {
    /// Answer to a probe, echoing its token
    Ready { token: Uuid, pid: u32 },

    /// Liveness signal while a request is executing
    Heartbeat { seq: u64 },

    /// Completed request
    Response {
        seq: u64,
        response: ResponseFrame,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        memory_bytes: Option<u64>,
    },

    /// The worker could not produce a response but remains usable
    Error {
        seq: Option<u64>,
        error: WorkerError,
    },
}

/// Worker error types
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "error_type", rename_all = "snake_case")]
pub enum WorkerError {
    /// Application code failed to handle the request
    Application { message: String },

    /// Worker initialization failed
    InitializationFailed { error: String },

    /// Message parse error
    MessageParseError { error: String },
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerError::Application { message } => write!(f, "Application error: {}", message),
            WorkerError::InitializationFailed { error } => {
                write!(f, "Worker initialization failed: {}", error)
            }
            WorkerError::MessageParseError { error } => write!(f, "Message parse error: {}", error),
        }
    }
}

impl std::error::Error for WorkerError {}

/// Message envelope for all IPC communications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageEnvelope<T> {
    pub protocol_version: u32,
    pub timestamp: DateTime<Utc>,
    pub message: T,
}

impl<T> MessageEnvelope<T> {
    /// Create a new message envelope
    pub fn new(message: T) -> Self {
        Self {
            protocol_version: IPC_PROTOCOL_VERSION,
            timestamp: Utc::now(),
            message,
        }
    }

    /// Check if protocol version is compatible
    pub fn is_compatible(&self) -> bool {
        self.protocol_version == IPC_PROTOCOL_VERSION
    }
}

/// Bodies travel as base64 inside the JSON frames
mod base64_body {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frame_wire_shape() {
        let frame = RequestFrame::new("POST", "/submit?x=1")
            .with_header("Content-Type", "application/json")
            .with_body(b"{}".to_vec());
        let message = ManagerMessage::Request { seq: 7, request: frame };

        let value = serde_json::to_value(MessageEnvelope::new(message)).unwrap();
        assert_eq!(value["protocol_version"], IPC_PROTOCOL_VERSION);
        assert_eq!(value["message"]["type"], "request");
        assert_eq!(value["message"]["seq"], 7);
        assert_eq!(value["message"]["request"]["body"], "e30=");
        assert_eq!(
            value["message"]["request"]["headers"][0],
            serde_json::json!(["Content-Type", "application/json"])
        );
    }

    #[test]
    fn test_path_strips_query() {
        assert_eq!(RequestFrame::new("GET", "/a/b?c=d").path(), "/a/b");
        assert_eq!(RequestFrame::new("GET", "/plain").path(), "/plain");
    }

    #[test]
    fn test_reply_without_memory_parses() {
        let json = r#"{"type":"response","seq":3,"response":{"status":204}}"#;
        let reply: WorkerReply = serde_json::from_str(json).unwrap();
        match reply {
            WorkerReply::Response { seq, response, memory_bytes } => {
                assert_eq!(seq, 3);
                assert_eq!(response.status, 204);
                assert!(response.body.is_empty());
                assert!(memory_bytes.is_none());
            }
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[test]
    fn test_invalid_base64_body_rejected() {
        let json = r#"{"status":200,"body":"***"}"#;
        assert!(serde_json::from_str::<ResponseFrame>(json).is_err());
    }

    #[test]
    fn test_message_envelope() {
        let envelope = MessageEnvelope::new(ManagerMessage::Probe { token: Uuid::new_v4() });
        assert!(envelope.is_compatible());

        let mut stale = envelope.clone();
        stale.protocol_version = IPC_PROTOCOL_VERSION + 1;
        assert!(!stale.is_compatible());
    }

    #[test]
    fn test_worker_error_display() {
        let err = WorkerError::Application {
            message: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Application error: boom");
    }

    #[test]
    fn test_encoded_len_bounds_the_wire_frame() {
        let request = RequestFrame::new("POST", "/upload?name=\"quoted\"")
            .with_header("Content-Type", "text/plain")
            .with_header("X-Note", "line\nbreak")
            .with_body(vec![0xffu8; 1000]);
        let message = ManagerMessage::Request {
            seq: u64::MAX,
            request: request.clone(),
        };
        let mut wire = serde_json::to_vec(&MessageEnvelope::new(message)).unwrap();
        wire.push(b'\n');

        assert!(request.encoded_len() >= wire.len());
        assert!(request.encoded_len() - wire.len() < ENVELOPE_OVERHEAD_BYTES);
    }
}
