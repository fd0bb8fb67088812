//! Raw socket listener
//!
//! Each frame on the wire is a 4-byte big-endian length followed by a JSON
//! encoded [`RequestFrame`] (or [`ResponseFrame`] going back). A connection
//! carries any number of requests, answered in order. Connections idle for
//! longer than the read timeout are closed.
//!
//! `max_body_bytes` limits the decoded body. The frame itself may be larger
//! by the base64 expansion plus headroom for the method, target and headers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use resident_config::{frame_bytes_for_body, ListenerConfig};
use resident_ipc::{RequestFrame, ResponseFrame};
use resident_resilience::{ShutdownCoordinator, ShutdownSignal};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

use super::{bind, error_frame, Listener};
use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::request::Request;

fn codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// Length-prefixed JSON transport over TCP
pub struct SocketListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: ListenerConfig,
    dispatcher: Dispatcher,
    request_timeout: Duration,
}

impl SocketListener {
    pub async fn bind(
        config: &ListenerConfig,
        dispatcher: Dispatcher,
        request_timeout: Duration,
    ) -> Result<Self, ServerError> {
        let (listener, local_addr) = bind(&config.bind_address).await?;
        Ok(Self {
            listener,
            local_addr,
            config: config.clone(),
            dispatcher,
            request_timeout,
        })
    }
}

#[async_trait]
impl Listener for SocketListener {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn serve(self: Box<Self>, shutdown: ShutdownCoordinator) -> Result<(), ServerError> {
        let SocketListener {
            listener,
            local_addr,
            config,
            dispatcher,
            request_timeout,
        } = *self;

        info!("Socket listener on {}", local_addr);
        let slots = Arc::new(Semaphore::new(config.max_connections));

        loop {
            let permit = tokio::select! {
                _ = shutdown.wait_for(ShutdownSignal::Graceful) => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let (stream, peer) = tokio::select! {
                _ = shutdown.wait_for(ShutdownSignal::Graceful) => break,
                accepted = listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("Socket accept failed: {}", e);
                        continue;
                    }
                },
            };

            let connection = Connection {
                config: config.clone(),
                dispatcher: dispatcher.clone(),
                request_timeout,
                shutdown: shutdown.clone(),
            };
            let guard = shutdown.track();
            tokio::spawn(async move {
                let _permit = permit;
                let _guard = guard;
                debug!(%peer, "Socket connection opened");
                connection.run(stream).await;
                debug!(%peer, "Socket connection closed");
            });
        }

        drop(listener);
        // Open connections finish the request they are serving, then close
        let drain = request_timeout + config.write_timeout;
        if !shutdown.wait_for_tasks(drain).await {
            warn!(
                "{} socket connection(s) still open after {:?}",
                shutdown.active_task_count(),
                drain
            );
        }
        info!("Socket listener on {} stopped", local_addr);
        Ok(())
    }
}

fn payload_too_large() -> ResponseFrame {
    ResponseFrame::new(413)
        .with_header("content-type", "text/plain; charset=utf-8")
        .with_body(b"payload too large".to_vec())
}

struct Connection {
    config: ListenerConfig,
    dispatcher: Dispatcher,
    request_timeout: Duration,
    shutdown: ShutdownCoordinator,
}

impl Connection {
    async fn run(self, stream: TcpStream) {
        let (read, write) = stream.into_split();
        let mut reader = FramedRead::new(read, codec(frame_bytes_for_body(self.config.max_body_bytes)));
        let mut writer = FramedWrite::new(write, codec(u32::MAX as usize));

        loop {
            let next = tokio::select! {
                _ = self.shutdown.wait_for(ShutdownSignal::Graceful) => break,
                next = tokio::time::timeout(self.config.read_timeout, reader.next()) => next,
            };

            let payload = match next {
                Err(_) => {
                    debug!("Closing idle socket connection");
                    break;
                }
                Ok(None) => break,
                Ok(Some(Err(e))) if e.kind() == io::ErrorKind::InvalidData => {
                    // The stream cannot be resynchronised after an oversized frame
                    let _ = self.send(&mut writer, payload_too_large()).await;
                    break;
                }
                Ok(Some(Err(e))) => {
                    debug!("Socket read failed: {}", e);
                    break;
                }
                Ok(Some(Ok(payload))) => payload,
            };

            let reply = self.answer(&payload).await;
            if let Err(e) = self.send(&mut writer, reply).await {
                debug!("Socket write failed: {}", e);
                break;
            }
        }
    }

    async fn answer(&self, payload: &[u8]) -> ResponseFrame {
        let received_at = Instant::now();
        let frame = match serde_json::from_slice::<RequestFrame>(payload) {
            Ok(frame) => frame,
            Err(e) => {
                return ResponseFrame::new(400)
                    .with_header("content-type", "text/plain; charset=utf-8")
                    .with_body(format!("malformed request frame: {}", e).into_bytes());
            }
        };
        if frame.body.len() > self.config.max_body_bytes {
            return payload_too_large();
        }

        let request = Request::with_deadline(frame, received_at, received_at + self.request_timeout);
        let request_id = request.id.to_string();
        let frame = match self.dispatcher.handle(request).await {
            Ok(response) => response.frame,
            Err(e) => {
                debug!(%request_id, "Dispatch failed: {}", e);
                error_frame(&e)
            }
        };

        let mut frame = frame;
        frame.headers.insert("x-request-id", request_id);
        frame
    }

    async fn send(
        &self,
        writer: &mut FramedWrite<OwnedWriteHalf, LengthDelimitedCodec>,
        reply: ResponseFrame,
    ) -> io::Result<()> {
        let encoded = serde_json::to_vec(&reply).map_err(io::Error::other)?;
        tokio::time::timeout(self.config.write_timeout, writer.send(Bytes::from(encoded)))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "socket write timed out"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::watch::WatchTable;
    use resident_config::PoolConfig;
    use resident_pool::testing::FakeSpawner;
    use resident_pool::WorkerPool;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type Started = (
        SocketAddr,
        WorkerPool,
        ShutdownCoordinator,
        tokio::task::JoinHandle<Result<(), ServerError>>,
    );

    async fn start(max_body_bytes: usize) -> Started {
        let pool = WorkerPool::new(
            PoolConfig {
                workers: 1,
                stop_timeout: Duration::from_millis(100),
                ..PoolConfig::default()
            },
            Arc::new(FakeSpawner::new()),
        );
        pool.reconcile();
        assert!(pool.wait_for_ready(1, Duration::from_secs(2)).await);

        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            max_body_bytes,
            ..ListenerConfig::socket_default()
        };
        let dispatcher = Dispatcher::new(pool.clone(), WatchTable::new(), Duration::from_secs(1));
        let listener = SocketListener::bind(&config, dispatcher, Duration::from_secs(5)).await.unwrap();
        let addr = listener.local_addr();
        let shutdown = ShutdownCoordinator::new();
        let task = tokio::spawn(Box::new(listener).serve(shutdown.clone()));
        (addr, pool, shutdown, task)
    }

    async fn write_frame(stream: &mut TcpStream, payload: &[u8]) {
        stream.write_u32(payload.len() as u32).await.unwrap();
        stream.write_all(payload).await.unwrap();
    }

    async fn read_reply(stream: &mut TcpStream) -> ResponseFrame {
        let len = stream.read_u32().await.unwrap() as usize;
        let mut buf = vec![0u8; len];
        stream.read_exact(&mut buf).await.unwrap();
        serde_json::from_slice(&buf).unwrap()
    }

    #[tokio::test]
    async fn test_requests_share_a_connection() {
        let (addr, pool, _shutdown, _task) = start(1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        for body in ["first", "second"] {
            let request = RequestFrame::new("POST", "/echo").with_body(body.as_bytes().to_vec());
            write_frame(&mut stream, &serde_json::to_vec(&request).unwrap()).await;
            let reply = read_reply(&mut stream).await;
            assert_eq!(reply.status, 200);
            assert_eq!(reply.body, body.as_bytes());
            assert!(reply.headers.contains("x-request-id"));
        }

        let served: u64 = pool.snapshot().workers.iter().map(|w| w.requests_served).sum();
        assert_eq!(served, 2);
    }

    #[tokio::test]
    async fn test_malformed_frame_gets_bad_request() {
        let (addr, _pool, _shutdown, _task) = start(1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        write_frame(&mut stream, b"not json").await;
        assert_eq!(read_reply(&mut stream).await.status, 400);

        // The connection stays usable
        let request = RequestFrame::new("GET", "/echo");
        write_frame(&mut stream, &serde_json::to_vec(&request).unwrap()).await;
        assert_eq!(read_reply(&mut stream).await.status, 200);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_and_closed() {
        let (addr, pool, _shutdown, _task) = start(64).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // The length prefix alone is enough to reject the frame
        stream.write_u32(frame_bytes_for_body(64) as u32 + 1).await.unwrap();
        assert_eq!(read_reply(&mut stream).await.status, 413);

        let mut rest = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest)).await;
        assert!(matches!(read, Ok(Ok(0)) | Ok(Err(_))));
        assert_eq!(pool.snapshot().workers[0].requests_served, 0);
    }

    #[tokio::test]
    async fn test_body_limit_applies_to_decoded_body() {
        let (addr, pool, _shutdown, _task) = start(1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        // The encoded frame is well over 1024 bytes but the body is at the limit
        let at_limit = RequestFrame::new("POST", "/echo").with_body(vec![b'a'; 1024]);
        let payload = serde_json::to_vec(&at_limit).unwrap();
        assert!(payload.len() > 1024);
        write_frame(&mut stream, &payload).await;
        let reply = read_reply(&mut stream).await;
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body.len(), 1024);

        let over = RequestFrame::new("POST", "/echo").with_body(vec![b'a'; 1025]);
        write_frame(&mut stream, &serde_json::to_vec(&over).unwrap()).await;
        assert_eq!(read_reply(&mut stream).await.status, 413);

        // The whole frame was consumed so the connection stays in sync
        let small = RequestFrame::new("POST", "/echo").with_body(b"ok".to_vec());
        write_frame(&mut stream, &serde_json::to_vec(&small).unwrap()).await;
        assert_eq!(read_reply(&mut stream).await.status, 200);

        let served: u64 = pool.snapshot().workers.iter().map(|w| w.requests_served).sum();
        assert_eq!(served, 2);
    }

    #[tokio::test]
    async fn test_dispatch_error_is_framed() {
        let (addr, _pool, _shutdown, _task) = start(1024).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let request = RequestFrame::new("GET", "/fail");
        write_frame(&mut stream, &serde_json::to_vec(&request).unwrap()).await;
        assert_eq!(read_reply(&mut stream).await.status, 500);
    }

    #[tokio::test]
    async fn test_shutdown_stops_listener() {
        let (addr, _pool, shutdown, task) = start(1024).await;
        let _idle = TcpStream::connect(addr).await.unwrap();

        shutdown.signal(ShutdownSignal::Graceful);
        let result = tokio::time::timeout(Duration::from_secs(2), task).await;
        assert!(result.unwrap().unwrap().is_ok());
    }
}
