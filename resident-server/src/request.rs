//! Request and response envelopes passed between listeners and the dispatcher

use std::time::Duration;

use resident_ipc::{RequestFrame, ResponseFrame};
use resident_pool::WorkerId;
use tokio::time::Instant;
use uuid::Uuid;

/// One inbound request with its deadline
#[derive(Debug, Clone)]
pub struct Request {
    pub id: Uuid,
    pub frame: RequestFrame,
    pub received_at: Instant,
    pub deadline: Instant,
}

impl Request {
    /// A request received now, due within `timeout`
    pub fn new(frame: RequestFrame, timeout: Duration) -> Self {
        let received_at = Instant::now();
        Self::with_deadline(frame, received_at, received_at + timeout)
    }

    pub fn with_deadline(frame: RequestFrame, received_at: Instant, deadline: Instant) -> Self {
        Self {
            id: Uuid::new_v4(),
            frame,
            received_at,
            deadline,
        }
    }

    /// Time left before the deadline
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A worker's answer to one [`Request`]
#[derive(Debug, Clone)]
pub struct Response {
    pub request_id: Uuid,
    pub worker: WorkerId,
    pub frame: ResponseFrame,
}
