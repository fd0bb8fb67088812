//! Forwarding requests to workers

use std::time::Duration;

use resident_pool::{ExchangeOutcome, ReleaseOutcome, WorkerPool};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::DispatchError;
use crate::request::{Request, Response};
use crate::supervisor::watch::WatchTable;

/// Routes each request to exactly one worker
#[derive(Clone)]
pub struct Dispatcher {
    pool: WorkerPool,
    watch: WatchTable,
    cancel_grace: Duration,
}

impl Dispatcher {
    pub fn new(pool: WorkerPool, watch: WatchTable, cancel_grace: Duration) -> Self {
        Self {
            pool,
            watch,
            cancel_grace,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn watch(&self) -> &WatchTable {
        &self.watch
    }

    /// Acquire a worker, forward the request and wait for its response.
    ///
    /// The exchange runs in its own task. When the deadline passes first the
    /// caller gets [`DispatchError::GatewayTimeout`] while the exchange keeps
    /// going for the cancellation grace period; a late response still
    /// returns the worker to the pool, no response gets it killed.
    pub async fn handle(&self, request: Request) -> Result<Response, DispatchError> {
        if request.deadline <= Instant::now() {
            return Err(DispatchError::DeadlineExceeded);
        }

        // A frame the worker would refuse must not cost a worker
        let size = request.frame.encoded_len();
        let limit = self.pool.config().max_frame_bytes;
        if size > limit {
            return Err(DispatchError::PayloadTooLarge { size, limit });
        }

        let request_id = request.id;
        let mut handle = self.pool.acquire(request.deadline).await?;
        let worker = handle.id();
        debug!(%request_id, worker_id = %worker, "Dispatching request");

        self.watch.begin(worker);
        let pool = self.pool.clone();
        let watch = self.watch.clone();
        let hard_deadline = request.deadline + self.cancel_grace;
        let frame = request.frame;

        let exchange = tokio::spawn(async move {
            let beats = watch.clone();
            let result = tokio::time::timeout_at(
                hard_deadline,
                handle.exchange(frame, move || beats.heartbeat(worker)),
            )
            .await;

            match result {
                Ok(Ok(ExchangeOutcome::Response {
                    response,
                    memory_bytes,
                })) => {
                    watch.complete(worker);
                    pool.release(handle, ReleaseOutcome::Success { memory_bytes });
                    Ok(response)
                }
                Ok(Ok(ExchangeOutcome::ApplicationError(error))) => {
                    watch.complete(worker);
                    pool.release(handle, ReleaseOutcome::success());
                    Err(DispatchError::Application(error.to_string()))
                }
                Ok(Err(e)) => {
                    warn!(%request_id, worker_id = %worker, "Worker failed mid-request: {}", e);
                    watch.forget(worker);
                    pool.release(handle, ReleaseOutcome::failure(e.to_string()));
                    Err(DispatchError::WorkerCrashed(e.to_string()))
                }
                Err(_) => {
                    warn!(%request_id, worker_id = %worker, "No response within the cancellation grace");
                    watch.forget(worker);
                    pool.release(handle, ReleaseOutcome::failure("response overdue"));
                    Err(DispatchError::GatewayTimeout)
                }
            }
        });

        match tokio::time::timeout_at(request.deadline, exchange).await {
            Ok(Ok(Ok(frame))) => Ok(Response {
                request_id,
                worker,
                frame,
            }),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(e)) => Err(DispatchError::WorkerCrashed(e.to_string())),
            Err(_) => {
                debug!(%request_id, worker_id = %worker, "Deadline passed, exchange continues detached");
                Err(DispatchError::GatewayTimeout)
            }
        }
    }
}
