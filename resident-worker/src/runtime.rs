//! Request loop run inside each worker process

use std::sync::Arc;
use std::time::Duration;

use resident_ipc::{
    IpcError, IpcTransport, ManagerMessage, MessageEnvelope, RequestFrame, ResponseFrame,
    StdioTransport, WorkerError, WorkerReply,
};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::app::{AppError, Application};
use crate::memory::RssReader;

/// Default interval between heartbeat frames while a request runs
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Errors that end the worker loop abnormally
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("IPC failure: {0}")]
    Ipc(#[from] IpcError),

    #[error("Application failed to boot: {0}")]
    Boot(String),

    #[error("Application reported a fatal error: {0}")]
    Fatal(String),
}

/// Drives one [`Application`] over an IPC transport
pub struct WorkerRuntime<A> {
    app: Arc<A>,
    heartbeat_interval: Option<Duration>,
    report_memory: bool,
    max_frame_bytes: Option<usize>,
}

impl<A: Application> WorkerRuntime<A> {
    pub fn new(app: A) -> Self {
        Self::from_arc(Arc::new(app))
    }

    pub fn from_arc(app: Arc<A>) -> Self {
        Self {
            app,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            report_memory: true,
            max_frame_bytes: None,
        }
    }

    /// Heartbeat interval while a request runs; `None` disables heartbeats
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Whether responses carry the process' resident memory
    pub fn with_memory_reporting(mut self, enabled: bool) -> Self {
        self.report_memory = enabled;
        self
    }

    /// Frame limit for [`run_stdio`](Self::run_stdio). Without it the limit
    /// the manager exported to the environment applies.
    pub fn with_max_frame_bytes(mut self, limit: usize) -> Self {
        self.max_frame_bytes = Some(limit);
        self
    }

    /// Serve over the process' stdin/stdout
    pub async fn run_stdio(self) -> Result<u64, RuntimeError> {
        let transport = match self.max_frame_bytes {
            Some(limit) => StdioTransport::stdio().with_max_frame_bytes(limit),
            None => StdioTransport::stdio_from_env(),
        };
        self.serve(transport).await
    }

    /// Serve until shutdown or end of input. Returns the number of requests
    /// answered.
    pub async fn serve<T: IpcTransport>(self, mut transport: T) -> Result<u64, RuntimeError> {
        if let Err(e) = self.app.boot().await {
            error!("Application boot failed: {}", e);
            let reply = WorkerReply::Error {
                seq: None,
                error: WorkerError::InitializationFailed {
                    error: e.to_string(),
                },
            };
            // Best effort, the manager treats a missing ready as a failed spawn
            let _ = transport.send(&MessageEnvelope::new(reply)).await;
            return Err(RuntimeError::Boot(e.to_string()));
        }

        let mut served = 0u64;
        let mut rss = self.report_memory.then(RssReader::new);

        loop {
            let envelope = match transport.receive::<ManagerMessage>().await {
                Ok(envelope) => envelope,
                Err(IpcError::ConnectionClosed) => {
                    info!("Manager closed the channel, shutting down");
                    break;
                }
                Err(IpcError::DeserializationError(e)) => {
                    warn!("Failed to parse manager message: {}", e);
                    let reply = WorkerReply::Error {
                        seq: None,
                        error: WorkerError::MessageParseError { error: e },
                    };
                    transport.send(&MessageEnvelope::new(reply)).await?;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match envelope.message {
                ManagerMessage::Probe { token } => {
                    debug!("Answering readiness probe");
                    let reply = WorkerReply::Ready {
                        token,
                        pid: std::process::id(),
                    };
                    transport.send(&MessageEnvelope::new(reply)).await?;
                }
                ManagerMessage::Request { seq, request } => {
                    debug!(seq, method = %request.method, target = %request.target, "Handling request");
                    let outcome = self.execute(&mut transport, seq, request).await?;

                    let reply = match outcome {
                        Ok(response) => WorkerReply::Response {
                            seq,
                            response,
                            memory_bytes: rss.as_mut().and_then(RssReader::current),
                        },
                        Err(AppError::Failed(message)) => WorkerReply::Error {
                            seq: Some(seq),
                            error: WorkerError::Application { message },
                        },
                        Err(AppError::Fatal(message)) => {
                            error!(seq, "Fatal application error: {}", message);
                            return Err(RuntimeError::Fatal(message));
                        }
                    };

                    self.app.reset().await;
                    transport.send(&MessageEnvelope::new(reply)).await?;
                    served += 1;
                }
                ManagerMessage::Shutdown => {
                    info!("Shutdown requested after {} requests", served);
                    break;
                }
            }
        }

        Ok(served)
    }

    /// Run the handler, emitting heartbeats until it completes
    async fn execute<T: IpcTransport>(
        &self,
        transport: &mut T,
        seq: u64,
        request: RequestFrame,
    ) -> Result<Result<ResponseFrame, AppError>, IpcError> {
        let handle = self.app.handle(request);
        tokio::pin!(handle);

        let Some(interval) = self.heartbeat_interval else {
            return Ok(handle.await);
        };

        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        loop {
            tokio::select! {
                result = &mut handle => return Ok(result),
                _ = ticker.tick() => {
                    transport
                        .send(&MessageEnvelope::new(WorkerReply::Heartbeat { seq }))
                        .await?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use resident_ipc::BoxedTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    #[derive(Default)]
    struct ScriptedApp {
        resets: AtomicUsize,
    }

    #[async_trait]
    impl Application for ScriptedApp {
        async fn handle(&self, request: RequestFrame) -> Result<ResponseFrame, AppError> {
            match request.path() {
                "/fail" => Err(AppError::Failed("no such thing".to_string())),
                "/fatal" => Err(AppError::Fatal("corrupted".to_string())),
                "/slow" => {
                    tokio::time::sleep(Duration::from_millis(120)).await;
                    Ok(ResponseFrame::new(200))
                }
                _ => Ok(ResponseFrame::new(200).with_body(request.body)),
            }
        }

        async fn reset(&self) {
            self.resets.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn start(
        app: Arc<ScriptedApp>,
        heartbeat: Option<Duration>,
    ) -> (BoxedTransport, JoinHandle<Result<u64, RuntimeError>>) {
        let (manager_end, worker_end) = tokio::io::duplex(64 * 1024);
        let (m_read, m_write) = tokio::io::split(manager_end);
        let (w_read, w_write) = tokio::io::split(worker_end);

        let runtime = WorkerRuntime::from_arc(app)
            .with_heartbeat(heartbeat)
            .with_memory_reporting(false);
        let task = tokio::spawn(runtime.serve(BoxedTransport::boxed(w_read, w_write)));
        (BoxedTransport::boxed(m_read, m_write), task)
    }

    async fn send(manager: &mut BoxedTransport, message: ManagerMessage) {
        manager.send(&MessageEnvelope::new(message)).await.unwrap();
    }

    async fn recv(manager: &mut BoxedTransport) -> WorkerReply {
        manager.receive::<WorkerReply>().await.unwrap().message
    }

    #[tokio::test]
    async fn test_probe_then_request() {
        let app = Arc::new(ScriptedApp::default());
        let (mut manager, task) = start(app.clone(), None);

        let token = Uuid::new_v4();
        send(&mut manager, ManagerMessage::Probe { token }).await;
        match recv(&mut manager).await {
            WorkerReply::Ready { token: echoed, pid } => {
                assert_eq!(echoed, token);
                assert_eq!(pid, std::process::id());
            }
            other => panic!("expected ready, got {:?}", other),
        }

        let request = RequestFrame::new("POST", "/echo").with_body(b"hello".to_vec());
        send(&mut manager, ManagerMessage::Request { seq: 1, request }).await;
        match recv(&mut manager).await {
            WorkerReply::Response { seq, response, memory_bytes } => {
                assert_eq!(seq, 1);
                assert_eq!(response.body, b"hello");
                assert!(memory_bytes.is_none());
            }
            other => panic!("expected response, got {:?}", other),
        }

        send(&mut manager, ManagerMessage::Shutdown).await;
        assert_eq!(task.await.unwrap().unwrap(), 1);
        assert_eq!(app.resets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_application_error_keeps_worker_alive() {
        let app = Arc::new(ScriptedApp::default());
        let (mut manager, task) = start(app.clone(), None);

        send(&mut manager, ManagerMessage::Request { seq: 4, request: RequestFrame::new("GET", "/fail") }).await;
        match recv(&mut manager).await {
            WorkerReply::Error { seq, error } => {
                assert_eq!(seq, Some(4));
                assert!(matches!(error, WorkerError::Application { .. }));
            }
            other => panic!("expected error, got {:?}", other),
        }

        send(&mut manager, ManagerMessage::Request { seq: 5, request: RequestFrame::new("GET", "/ok") }).await;
        assert!(matches!(recv(&mut manager).await, WorkerReply::Response { seq: 5, .. }));

        drop(manager);
        assert_eq!(task.await.unwrap().unwrap(), 2);
        assert_eq!(app.resets.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fatal_error_exits_without_reply() {
        let (mut manager, task) = start(Arc::new(ScriptedApp::default()), None);

        send(&mut manager, ManagerMessage::Request { seq: 1, request: RequestFrame::new("GET", "/fatal") }).await;
        let result = task.await.unwrap();
        assert!(matches!(result, Err(RuntimeError::Fatal(_))));

        let err = manager.receive::<WorkerReply>().await.unwrap_err();
        assert!(matches!(err, IpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_heartbeats_precede_slow_response() {
        let (mut manager, _task) =
            start(Arc::new(ScriptedApp::default()), Some(Duration::from_millis(30)));

        send(&mut manager, ManagerMessage::Request { seq: 9, request: RequestFrame::new("GET", "/slow") }).await;

        let mut heartbeats = 0;
        loop {
            match recv(&mut manager).await {
                WorkerReply::Heartbeat { seq } => {
                    assert_eq!(seq, 9);
                    heartbeats += 1;
                }
                WorkerReply::Response { seq, .. } => {
                    assert_eq!(seq, 9);
                    break;
                }
                other => panic!("unexpected reply: {:?}", other),
            }
        }
        assert!(heartbeats >= 1);
    }

    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    #[tokio::test]
    async fn test_response_carries_resident_bytes() {
        let (manager_end, worker_end) = tokio::io::duplex(64 * 1024);
        let (m_read, m_write) = tokio::io::split(manager_end);
        let (w_read, w_write) = tokio::io::split(worker_end);
        let runtime = WorkerRuntime::new(ScriptedApp::default()).with_heartbeat(None);
        let _task = tokio::spawn(runtime.serve(BoxedTransport::boxed(w_read, w_write)));
        let mut manager = BoxedTransport::boxed(m_read, m_write);

        send(&mut manager, ManagerMessage::Request { seq: 1, request: RequestFrame::new("GET", "/") }).await;
        match recv(&mut manager).await {
            WorkerReply::Response { memory_bytes, .. } => {
                assert!(memory_bytes.unwrap() > 64 * 1024);
            }
            other => panic!("expected response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_over_frame_limit_ends_loop() {
        let (manager_end, worker_end) = tokio::io::duplex(64 * 1024);
        let (m_read, m_write) = tokio::io::split(manager_end);
        let (w_read, w_write) = tokio::io::split(worker_end);
        let runtime = WorkerRuntime::new(ScriptedApp::default())
            .with_heartbeat(None)
            .with_memory_reporting(false);
        let worker = BoxedTransport::boxed(w_read, w_write).with_max_frame_bytes(1024);
        let task = tokio::spawn(runtime.serve(worker));
        let mut manager = BoxedTransport::boxed(m_read, m_write);

        let request = RequestFrame::new("POST", "/echo").with_body(vec![7u8; 4096]);
        send(&mut manager, ManagerMessage::Request { seq: 1, request }).await;

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(RuntimeError::Ipc(IpcError::FrameTooLarge { limit: 1024 }))
        ));
    }
}
