//! Seam between the build orchestrator and a container runtime
//!
//! The orchestrator only ever talks to a [`ContainerRuntime`]; the Docker
//! implementation lives in [`crate::docker`]. A [`RuntimeConnector`] hands
//! out one runtime connection per build session.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use k6x_errors::{Error, RuntimeError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Pull progress records, one decoded JSON object per item
pub type RecordStream = BoxStream<'static, Result<serde_json::Value, Error>>;

/// Raw bytes of an archive fetched from a container
pub type ByteStream = BoxStream<'static, Result<Bytes, Error>>;

/// Demultiplexed container output
pub type LogStream = BoxStream<'static, Result<LogChunk, Error>>;

/// Everything needed to create the build container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSpec {
    pub image: String,
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    pub tty: bool,
    pub mounts: Vec<VolumeMount>,
}

/// A named volume bound into the container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub source: String,
    pub target: String,
}

/// One frame of container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

impl LogChunk {
    #[must_use]
    pub fn stream_name(&self) -> &'static str {
        match self {
            Self::Stdout(_) => "stdout",
            Self::Stderr(_) => "stderr",
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &Bytes {
        match self {
            Self::Stdout(bytes) | Self::Stderr(bytes) => bytes,
        }
    }
}

/// The two completion signals a runtime offers while waiting for a
/// container to stop running.
///
/// Whichever signal resolves first decides the outcome. A background task
/// feeding the signals, if any, is aborted when this value is dropped.
pub struct WaitSignals {
    status: oneshot::Receiver<i64>,
    error: oneshot::Receiver<Error>,
    task: Option<JoinHandle<()>>,
}

/// Sending halves matching a [`WaitSignals`]
pub struct WaitSenders {
    pub status: oneshot::Sender<i64>,
    pub error: oneshot::Sender<Error>,
}

impl WaitSignals {
    /// Create a connected pair of signal senders and receivers
    #[must_use]
    pub fn channel() -> (WaitSenders, Self) {
        let (status_tx, status_rx) = oneshot::channel();
        let (error_tx, error_rx) = oneshot::channel();
        (
            WaitSenders {
                status: status_tx,
                error: error_tx,
            },
            Self {
                status: status_rx,
                error: error_rx,
                task: None,
            },
        )
    }

    /// Tie the lifetime of the task producing the signals to this value
    #[must_use]
    pub fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.task = Some(task);
        self
    }

    /// Resolve to the exit status, or to the error signal if that fires first
    ///
    /// # Errors
    ///
    /// Returns the error delivered on the error signal, or an operation error
    /// when both signals close without a value.
    pub async fn outcome(&mut self) -> Result<i64, Error> {
        let mut error_open = true;
        let mut status_open = true;

        loop {
            tokio::select! {
                received = &mut self.error, if error_open => match received {
                    Ok(err) => return Err(err),
                    Err(_) => error_open = false,
                },
                received = &mut self.status, if status_open => match received {
                    Ok(code) => return Ok(code),
                    Err(_) => status_open = false,
                },
                else => {
                    return Err(RuntimeError::operation(
                        "wait",
                        "runtime closed both wait signals",
                    )
                    .into())
                }
            }
        }
    }
}

impl Drop for WaitSignals {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Operations the orchestrator needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Lightweight liveness check
    async fn ping(&self) -> Result<(), Error>;

    /// Request an image; the runtime answers with a live progress feed
    fn pull_image(&self, image: &str) -> RecordStream;

    /// Create a container, returning its runtime assigned identifier
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, Error>;

    async fn start_container(&self, id: &str) -> Result<(), Error>;

    /// Wait until the container is no longer running
    fn wait_container(&self, id: &str) -> WaitSignals;

    /// Combined stdout/stderr of the container
    fn container_logs(&self, id: &str) -> LogStream;

    /// Fetch `path` from the container as a tar stream
    fn download_archive(&self, id: &str, path: &str) -> ByteStream;

    async fn remove_container(&self, id: &str) -> Result<(), Error>;
}

/// Produces runtime connections, one per build session
#[async_trait]
pub trait RuntimeConnector: Send + Sync {
    /// Establish a new connection
    ///
    /// Configuration problems are reported as `RuntimeError::InvalidHost`;
    /// an unreachable runtime as `Connection`, `Tunnel` or `Unreachable`.
    async fn connect(&self) -> Result<Box<dyn ContainerRuntime>, Error>;
}
