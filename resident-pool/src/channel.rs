//! Manager side of one worker's IPC channel

use std::time::Duration;

use resident_ipc::{
    BoxedTransport, IpcError, IpcTransport, ManagerMessage, MessageEnvelope, RequestFrame,
    ResponseFrame, WorkerError, WorkerReply,
};
use tokio::time::timeout;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::error::PoolError;
use crate::state::WorkerId;

/// Result of one request/response exchange that left the worker usable
#[derive(Debug)]
pub enum ExchangeOutcome {
    Response {
        response: ResponseFrame,
        memory_bytes: Option<u64>,
    },
    /// The application reported an error for this request
    ApplicationError(WorkerError),
}

/// Bidirectional channel to a single worker process
pub struct WorkerChannel {
    worker: WorkerId,
    transport: BoxedTransport,
    next_seq: u64,
}

impl WorkerChannel {
    pub fn new(worker: WorkerId, transport: BoxedTransport) -> Self {
        Self {
            worker,
            transport,
            next_seq: 1,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Probe the worker and wait for its ready reply. Returns the pid the
    /// worker reports for itself.
    pub async fn handshake(&mut self, startup_timeout: Duration) -> Result<u32, PoolError> {
        let token = Uuid::new_v4();
        self.transport
            .send(&MessageEnvelope::new(ManagerMessage::Probe { token }))
            .await?;

        let reply = timeout(startup_timeout, self.transport.receive::<WorkerReply>())
            .await
            .map_err(|_| {
                PoolError::Handshake(format!(
                    "{} not ready within {:?}",
                    self.worker, startup_timeout
                ))
            })??;

        match reply.message {
            WorkerReply::Ready { token: echoed, pid } if echoed == token => {
                debug!(worker_id = %self.worker, pid, "Worker ready");
                Ok(pid)
            }
            WorkerReply::Ready { .. } => Err(PoolError::Handshake(
                "ready reply carried the wrong token".to_string(),
            )),
            WorkerReply::Error {
                error: WorkerError::InitializationFailed { error },
                ..
            } => Err(PoolError::SpawnFailure(error)),
            other => Err(PoolError::Handshake(format!(
                "unexpected reply during handshake: {:?}",
                other
            ))),
        }
    }

    /// Send one request and wait for its final reply. `on_heartbeat` runs
    /// for every heartbeat frame received in between.
    pub async fn exchange<F>(
        &mut self,
        request: RequestFrame,
        mut on_heartbeat: F,
    ) -> Result<ExchangeOutcome, IpcError>
    where
        F: FnMut() + Send,
    {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.transport
            .send(&MessageEnvelope::new(ManagerMessage::Request { seq, request }))
            .await?;

        loop {
            let envelope = self.transport.receive::<WorkerReply>().await?;
            match envelope.message {
                WorkerReply::Heartbeat { seq: beat } if beat == seq => {
                    trace!(worker_id = %self.worker, seq, "Heartbeat");
                    on_heartbeat();
                }
                WorkerReply::Response {
                    seq: got,
                    response,
                    memory_bytes,
                } => {
                    check_seq(seq, got)?;
                    return Ok(ExchangeOutcome::Response {
                        response,
                        memory_bytes,
                    });
                }
                WorkerReply::Error {
                    seq: Some(got),
                    error,
                } => {
                    check_seq(seq, got)?;
                    return Ok(ExchangeOutcome::ApplicationError(error));
                }
                WorkerReply::Error { seq: None, error } => {
                    return Err(IpcError::WorkerError(error));
                }
                WorkerReply::Heartbeat { seq: got } => {
                    return Err(IpcError::SequenceMismatch { expected: seq, actual: got });
                }
                WorkerReply::Ready { .. } => {
                    return Err(IpcError::UnexpectedMessage(
                        "ready reply while a request was in flight".to_string(),
                    ));
                }
            }
        }
    }

    /// Ask the worker to exit and close our end
    pub async fn shutdown(mut self) {
        let _ = self
            .transport
            .send(&MessageEnvelope::new(ManagerMessage::Shutdown))
            .await;
        let _ = self.transport.close().await;
    }
}

fn check_seq(expected: u64, actual: u64) -> Result<(), IpcError> {
    if expected == actual {
        Ok(())
    } else {
        Err(IpcError::SequenceMismatch { expected, actual })
    }
}
