//! Server startup and shutdown logic

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use resident_config::{ResidentConfig, Validatable};
use resident_pool::{CommandSpawner, PoolSnapshot, ReloadReport, WorkerPool, WorkerSpawner};
use resident_resilience::{ShutdownCoordinator, ShutdownSignal};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::ServerError;
use crate::listener::http::HttpListener;
use crate::listener::socket::SocketListener;
use crate::listener::Listener;
use crate::supervisor::watch::WatchTable;
use crate::supervisor::{ShutdownReport, Supervisor, SupervisorHandle};

/// Extra time listeners get to wind down after the pool has drained
const LISTENER_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// A configured server, ready to start
pub struct ResidentServer {
    config: ResidentConfig,
    spawner: Arc<dyn WorkerSpawner>,
}

impl ResidentServer {
    /// Validate configuration and prepare to spawn workers as child processes
    pub fn new(config: ResidentConfig) -> Result<Self, ServerError> {
        config.validate_all()?;
        let spawner = CommandSpawner::from_config(&config.pool)?;
        Ok(Self {
            config,
            spawner: Arc::new(spawner),
        })
    }

    /// Use a custom spawner instead of OS child processes
    pub fn with_spawner(
        config: ResidentConfig,
        spawner: Arc<dyn WorkerSpawner>,
    ) -> Result<Self, ServerError> {
        config.validate_all()?;
        Ok(Self { config, spawner })
    }

    /// Spawn the pool, start supervising it and open the listeners
    pub async fn start(self) -> Result<ServerHandle, ServerError> {
        let ResidentServer { config, spawner } = self;
        log_config_summary(&config);

        let pool = WorkerPool::new(config.pool.clone(), spawner);
        pool.reconcile();

        let watch = WatchTable::new();
        let (supervisor, supervisor_task) =
            Supervisor::spawn(pool.clone(), watch.clone(), config.supervisor.clone());
        let dispatcher = Dispatcher::new(pool.clone(), watch, config.pool.cancel_grace);
        let request_timeout = config.pool.request_timeout;

        let mut listeners: Vec<Box<dyn Listener>> = Vec::new();
        let mut http_addr = None;
        let mut socket_addr = None;

        let bound: Result<(), ServerError> = async {
            if let Some(http) = &config.http {
                let listener = HttpListener::bind(http, dispatcher.clone(), request_timeout).await?;
                http_addr = Some(listener.local_addr());
                listeners.push(Box::new(listener));
            }
            if let Some(socket) = &config.socket {
                let listener = SocketListener::bind(socket, dispatcher.clone(), request_timeout).await?;
                socket_addr = Some(listener.local_addr());
                listeners.push(Box::new(listener));
            }
            Ok(())
        }
        .await;

        if let Err(e) = bound {
            // Nothing is serving yet; take the workers down before reporting
            let _ = supervisor.shutdown().await;
            return Err(e);
        }

        let shutdown = ShutdownCoordinator::new();
        let listener_tasks = listeners
            .into_iter()
            .map(|listener| {
                let name = listener.name();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    if let Err(e) = listener.serve(shutdown).await {
                        error!("{} listener failed: {}", name, e);
                    }
                })
            })
            .collect();

        info!("Resident started with {} workers", pool.desired());

        Ok(ServerHandle {
            pool,
            supervisor,
            supervisor_task,
            shutdown,
            listener_tasks,
            http_addr,
            socket_addr,
        })
    }
}

fn log_config_summary(config: &ResidentConfig) {
    info!("=== Resident Configuration ===");
    info!("Workers: {}", config.pool.workers);
    match &config.pool.command {
        Some(command) => info!("Worker command: {} {}", command, config.pool.args.join(" ")),
        None => info!("Worker command: built-in worker"),
    }
    if let Some(max) = config.pool.max_requests {
        info!("Recycle after {} requests", max);
    }
    if let Some(max) = config.pool.max_memory_mib {
        info!("Recycle above {} MiB", max);
    }
    info!("Request timeout: {:?}", config.pool.request_timeout);
    match &config.http {
        Some(http) => info!("HTTP: {}", http.bind_address),
        None => info!("HTTP: Disabled"),
    }
    match &config.socket {
        Some(socket) => info!("Socket: {}", socket.bind_address),
        None => info!("Socket: Disabled"),
    }
    info!("==============================");
}

/// Control surface of a running server
pub struct ServerHandle {
    pool: WorkerPool,
    supervisor: SupervisorHandle,
    supervisor_task: JoinHandle<()>,
    shutdown: ShutdownCoordinator,
    listener_tasks: Vec<JoinHandle<()>>,
    http_addr: Option<SocketAddr>,
    socket_addr: Option<SocketAddr>,
}

impl ServerHandle {
    /// Bound address of the HTTP listener, if enabled
    pub fn http_addr(&self) -> Option<SocketAddr> {
        self.http_addr
    }

    /// Bound address of the socket listener, if enabled
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.socket_addr
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn supervisor(&self) -> SupervisorHandle {
        self.supervisor.clone()
    }

    /// Wait until the pool has `count` ready workers
    pub async fn wait_ready(&self, count: usize, timeout: Duration) -> bool {
        self.pool.wait_for_ready(count, timeout).await
    }

    pub async fn reload(&self) -> Result<ReloadReport, ServerError> {
        Ok(self.supervisor.reload().await?)
    }

    /// Change the desired pool size; returns the previous size
    pub async fn resize(&self, workers: usize) -> Result<usize, ServerError> {
        Ok(self.supervisor.resize(workers).await?)
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, ServerError> {
        Ok(self.supervisor.snapshot().await?)
    }

    /// Translate OS signals into control actions: SIGINT and SIGTERM start a
    /// graceful shutdown, SIGHUP reloads the pool.
    pub fn handle_signals(&self) -> Result<(), ServerError> {
        let shutdown = self.shutdown.clone();
        let supervisor = self.supervisor.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut terminate = signal(SignalKind::terminate())?;
            let mut interrupt = signal(SignalKind::interrupt())?;
            let mut hangup = signal(SignalKind::hangup())?;

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = terminate.recv() => {
                            info!("SIGTERM received, starting graceful shutdown");
                            shutdown.signal(ShutdownSignal::Graceful);
                        }
                        _ = interrupt.recv() => {
                            if shutdown.is_shutting_down() {
                                warn!("Second interrupt, abandoning in-flight work");
                                shutdown.signal(ShutdownSignal::Forced);
                            } else {
                                info!("SIGINT received, starting graceful shutdown");
                                shutdown.signal(ShutdownSignal::Graceful);
                            }
                        }
                        _ = hangup.recv() => {
                            info!("SIGHUP received, reloading workers");
                            let supervisor = supervisor.clone();
                            tokio::spawn(async move {
                                match supervisor.reload().await {
                                    Ok(report) => info!(
                                        generation = report.generation,
                                        "Reload complete, retired {} workers",
                                        report.retired
                                    ),
                                    Err(e) => error!("Reload failed: {}", e),
                                }
                            });
                        }
                    }
                }
            });
        }

        #[cfg(not(unix))]
        {
            let _ = supervisor;
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, starting graceful shutdown");
                    shutdown.signal(ShutdownSignal::Graceful);
                }
            });
        }

        Ok(())
    }

    /// Block until a shutdown is requested, then perform it
    pub async fn wait(self) -> Result<ShutdownReport, ServerError> {
        self.shutdown.wait_for(ShutdownSignal::Graceful).await;
        self.shutdown().await
    }

    /// Stop accepting traffic, let in-flight requests finish within the
    /// shutdown grace period, then stop every worker.
    pub async fn shutdown(self) -> Result<ShutdownReport, ServerError> {
        info!("Shutting down");
        let started = Instant::now();
        self.shutdown.signal(ShutdownSignal::Graceful);

        let forced = self.shutdown.clone();
        let report = tokio::select! {
            report = self.supervisor.shutdown() => report?,
            _ = forced.wait_for(ShutdownSignal::Forced) => {
                let killed = self.pool.force_kill_all();
                warn!("Forced shutdown, killed {} workers", killed);
                ShutdownReport {
                    clean: false,
                    forced: killed,
                    elapsed: started.elapsed(),
                }
            }
        };

        for task in self.listener_tasks {
            if tokio::time::timeout(LISTENER_STOP_TIMEOUT, task).await.is_err() {
                warn!("Listener did not stop within {:?}", LISTENER_STOP_TIMEOUT);
            }
        }
        if tokio::time::timeout(LISTENER_STOP_TIMEOUT, self.supervisor_task)
            .await
            .is_err()
        {
            warn!("Supervisor did not stop within {:?}", LISTENER_STOP_TIMEOUT);
        }

        info!(
            clean = report.clean,
            forced = report.forced,
            "Shutdown complete in {:?}",
            report.elapsed
        );
        Ok(report)
    }
}
