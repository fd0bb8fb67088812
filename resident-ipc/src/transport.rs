//! IPC transport implementations

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::IpcError;
use crate::protocol::{MessageEnvelope, IPC_PROTOCOL_VERSION};

/// Upper bound on a single newline-delimited frame
pub const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Environment variable carrying the manager's frame limit into workers
pub const MAX_FRAME_BYTES_ENV: &str = "RESIDENT_MAX_FRAME_BYTES";

/// Frame limit from the value of [`MAX_FRAME_BYTES_ENV`], falling back to
/// [`DEFAULT_MAX_FRAME_BYTES`] when it is absent or not a positive integer
pub fn frame_limit_from(value: Option<&str>) -> usize {
    value
        .and_then(|raw| raw.trim().parse::<usize>().ok())
        .filter(|limit| *limit > 0)
        .unwrap_or(DEFAULT_MAX_FRAME_BYTES)
}

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError>;

    /// Close the sending half
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Newline-delimited JSON over any reader/writer pair
pub struct FramedTransport<R, W> {
    reader: BufReader<R>,
    writer: W,
    max_frame_bytes: usize,
    line: Vec<u8>,
}

/// Transport over the current process' stdin/stdout, used inside workers
pub type StdioTransport = FramedTransport<tokio::io::Stdin, tokio::io::Stdout>;

/// Transport over a child's piped stdout/stdin, used by the manager
pub type ChildProcessTransport =
    FramedTransport<tokio::process::ChildStdout, tokio::process::ChildStdin>;

/// Type-erased transport so real and in-memory pipes share one channel type
pub type BoxedTransport =
    FramedTransport<Box<dyn AsyncRead + Send + Unpin>, Box<dyn AsyncWrite + Send + Unpin>>;

impl<R, W> FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            line: Vec::new(),
        }
    }

    pub fn with_max_frame_bytes(mut self, max_frame_bytes: usize) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub fn max_frame_bytes(&self) -> usize {
        self.max_frame_bytes
    }
}

impl StdioTransport {
    pub fn stdio() -> Self {
        Self::new(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Stdio transport using the frame limit the manager passed down
    pub fn stdio_from_env() -> Self {
        let limit = frame_limit_from(std::env::var(MAX_FRAME_BYTES_ENV).ok().as_deref());
        Self::stdio().with_max_frame_bytes(limit)
    }
}

impl ChildProcessTransport {
    pub fn from_child(
        stdin: tokio::process::ChildStdin,
        stdout: tokio::process::ChildStdout,
    ) -> Self {
        Self::new(stdout, stdin)
    }
}

impl BoxedTransport {
    pub fn boxed<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::new(Box::new(reader), Box::new(writer))
    }
}

#[async_trait]
impl<R, W> IpcTransport for FramedTransport<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    async fn send<T: Serialize + Send + Sync>(
        &mut self,
        message: &MessageEnvelope<T>,
    ) -> Result<(), IpcError> {
        let mut frame =
            serde_json::to_vec(message).map_err(|e| IpcError::SerializationError(e.to_string()))?;
        frame.push(b'\n');

        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(
        &mut self,
    ) -> Result<MessageEnvelope<T>, IpcError> {
        self.line.clear();
        let limit = self.max_frame_bytes as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await?;

        if read == 0 {
            return Err(IpcError::ConnectionClosed);
        }

        if self.line.last() != Some(&b'\n') {
            if self.line.len() as u64 >= limit {
                return Err(IpcError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }
            // EOF in the middle of a frame
            return Err(IpcError::ConnectionClosed);
        }

        let envelope: MessageEnvelope<T> = serde_json::from_slice(self.line.trim_ascii_end())
            .map_err(|e| IpcError::DeserializationError(e.to_string()))?;

        if envelope.protocol_version != IPC_PROTOCOL_VERSION {
            return Err(IpcError::ProtocolVersionMismatch {
                expected: IPC_PROTOCOL_VERSION,
                actual: envelope.protocol_version,
            });
        }

        Ok(envelope)
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
