//! Creating worker processes

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use resident_config::PoolConfig;
use resident_ipc::{BoxedTransport, MAX_FRAME_BYTES_ENV};
use tokio::process::Command;
use tracing::{debug, info};

use crate::channel::WorkerChannel;
use crate::error::PoolError;
use crate::process::{forward_stderr, ChildProcess, ProcessHandle};
use crate::state::WorkerId;

/// Environment variable carrying the worker id into the child
pub const WORKER_ID_ENV: &str = "RESIDENT_WORKER_ID";

/// A freshly started worker that has not been probed yet
pub struct SpawnedWorker {
    pub channel: WorkerChannel,
    pub process: Box<dyn ProcessHandle>,
}

/// Starts worker processes on behalf of the pool
#[async_trait]
pub trait WorkerSpawner: Send + Sync + 'static {
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, PoolError>;
}

/// Spawns workers as OS child processes talking over stdin/stdout
#[derive(Debug, Clone)]
pub struct CommandSpawner {
    program: PathBuf,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_dir: Option<PathBuf>,
    max_frame_bytes: usize,
}

impl CommandSpawner {
    /// Build from pool configuration. Without a configured command the
    /// current executable is re-run in worker mode.
    pub fn from_config(config: &PoolConfig) -> Result<Self, PoolError> {
        let (program, args) = match &config.command {
            Some(command) => (PathBuf::from(command), config.args.clone()),
            None => {
                let exe = std::env::current_exe().map_err(|e| {
                    PoolError::SpawnFailure(format!("Cannot locate current executable: {}", e))
                })?;
                let mut args = vec!["worker".to_string()];
                args.extend(config.args.iter().cloned());
                (exe, args)
            }
        };

        info!("Worker command: {} {}", program.display(), args.join(" "));

        Ok(Self {
            program,
            args,
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    fn command(&self, id: WorkerId) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(&self.env)
            .env(WORKER_ID_ENV, id.as_u64().to_string())
            .env(MAX_FRAME_BYTES_ENV, self.max_frame_bytes.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}

#[async_trait]
impl WorkerSpawner for CommandSpawner {
    async fn spawn(&self, id: WorkerId) -> Result<SpawnedWorker, PoolError> {
        let mut command = self.command(id);
        let mut child = command.spawn().map_err(|e| {
            PoolError::SpawnFailure(format!("{}: {}", self.program.display(), e))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PoolError::SpawnFailure("Failed to get stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PoolError::SpawnFailure("Failed to get stdout".to_string()))?;
        if let Some(stderr) = child.stderr.take() {
            forward_stderr(id, stderr);
        }

        debug!(worker_id = %id, pid = ?child.id(), "Spawned worker process");

        let transport = BoxedTransport::boxed(stdout, stdin).with_max_frame_bytes(self.max_frame_bytes);
        Ok(SpawnedWorker {
            channel: WorkerChannel::new(id, transport),
            process: Box::new(ChildProcess::new(id, child)),
        })
    }
}
