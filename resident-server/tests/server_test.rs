//! Full server wiring with in-process workers

use std::sync::Arc;
use std::time::Duration;

use resident_config::{ListenerConfig, PoolConfig, ResidentConfig, SupervisorConfig};
use resident_ipc::{RequestFrame, ResponseFrame};
use resident_pool::testing::FakeSpawner;
use resident_server::{ResidentServer, ServerError, ServerHandle};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn config(workers: usize) -> ResidentConfig {
    ResidentConfig {
        pool: PoolConfig {
            workers,
            request_timeout: Duration::from_secs(2),
            stop_timeout: Duration::from_millis(200),
            ..PoolConfig::default()
        },
        supervisor: SupervisorConfig {
            interval: Duration::from_millis(50),
            shutdown_grace: Duration::from_secs(2),
            reload_timeout: Duration::from_secs(2),
            ..SupervisorConfig::default()
        },
        http: Some(ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..ListenerConfig::http_default()
        }),
        socket: Some(ListenerConfig {
            bind_address: "127.0.0.1:0".to_string(),
            ..ListenerConfig::socket_default()
        }),
        ..ResidentConfig::default()
    }
}

async fn start(workers: usize) -> (ServerHandle, Arc<FakeSpawner>) {
    let spawner = Arc::new(FakeSpawner::new());
    let server = ResidentServer::with_spawner(config(workers), spawner.clone()).unwrap();
    let handle = server.start().await.unwrap();
    assert!(handle.wait_ready(workers, Duration::from_secs(2)).await);
    (handle, spawner)
}

async fn socket_call(stream: &mut TcpStream, request: &RequestFrame) -> ResponseFrame {
    let payload = serde_json::to_vec(request).unwrap();
    stream.write_u32(payload.len() as u32).await.unwrap();
    stream.write_all(&payload).await.unwrap();

    let len = stream.read_u32().await.unwrap() as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await.unwrap();
    serde_json::from_slice(&buf).unwrap()
}

#[tokio::test]
async fn test_both_listeners_reach_the_pool() {
    let (handle, _spawner) = start(2).await;

    let http = handle.http_addr().unwrap();
    let response = reqwest::Client::new()
        .post(format!("http://{}/hello", http))
        .body("over http")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "over http");

    let mut stream = TcpStream::connect(handle.socket_addr().unwrap()).await.unwrap();
    let reply = socket_call(
        &mut stream,
        &RequestFrame::new("POST", "/hello").with_body(b"over socket".to_vec()),
    )
    .await;
    assert_eq!(reply.status, 200);
    assert_eq!(reply.body, b"over socket");

    let snapshot = handle.snapshot().await.unwrap();
    let served: u64 = snapshot.workers.iter().map(|w| w.requests_served).sum();
    assert_eq!(served, 2);

    let report = handle.shutdown().await.unwrap();
    assert!(report.clean);
}

#[tokio::test]
async fn test_crash_is_isolated_and_replaced() {
    let (handle, spawner) = start(2).await;
    let base = format!("http://{}", handle.http_addr().unwrap());
    let client = reqwest::Client::new();

    let crashed = client.get(format!("{}/crash", base)).send().await.unwrap();
    assert_eq!(crashed.status(), 500);

    for _ in 0..5 {
        let ok = client.get(format!("{}/echo", base)).send().await.unwrap();
        assert_eq!(ok.status(), 200);
    }

    assert!(handle.wait_ready(2, Duration::from_secs(2)).await);
    assert_eq!(spawner.spawn_count(), 3);
    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_resize_and_reload_through_handle() {
    let (handle, _spawner) = start(1).await;

    assert_eq!(handle.resize(3).await.unwrap(), 1);
    assert!(handle.wait_ready(3, Duration::from_secs(2)).await);

    let before = handle.snapshot().await.unwrap().generation;
    let report = handle.reload().await.unwrap();
    assert!(report.generation > before);
    assert_eq!(report.retired, 3);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.generation, report.generation);
    assert!(snapshot
        .workers
        .iter()
        .filter(|w| w.state.is_serving())
        .all(|w| w.generation == report.generation));

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_stops_workers_and_listeners() {
    let (handle, spawner) = start(2).await;
    let http = handle.http_addr().unwrap();

    let report = handle.shutdown().await.unwrap();
    assert!(report.clean);
    assert_eq!(report.forced, 0);
    assert_eq!(spawner.live_processes(), 0);
    assert!(TcpStream::connect(http).await.is_err());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut bad = config(1);
    bad.supervisor.interval = Duration::ZERO;
    let result = ResidentServer::with_spawner(bad, Arc::new(FakeSpawner::new()));
    assert!(matches!(result, Err(ServerError::Config(_))));
}

#[tokio::test]
async fn test_bind_failure_reported() {
    let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let mut cfg = config(1);
    cfg.socket = None;
    cfg.http = Some(ListenerConfig {
        bind_address: taken.local_addr().unwrap().to_string(),
        ..ListenerConfig::http_default()
    });

    let server = ResidentServer::with_spawner(cfg, Arc::new(FakeSpawner::new())).unwrap();
    let result = server.start().await;
    assert!(matches!(result, Err(ServerError::Bind { .. })));
}
