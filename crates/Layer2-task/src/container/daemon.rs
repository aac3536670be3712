//! Container daemon abstraction
//!
//! The session talks to the daemon only through [`ContainerDaemon`], so the
//! whole lifecycle can be driven by an in-memory fake in tests.

use super::snapshot::ContainerSnapshot;
use super::spec::ContainerSpec;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use std::pin::Pin;
use std::time::Duration;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;

// ============================================================================
// Streams
// ============================================================================

/// One frame of attached container output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Raw terminal stream (tty containers)
    Console(Vec<u8>),
}

pub type OutputStream = BoxStream<'static, Result<OutputChunk, DaemonError>>;
pub type InputSink = Pin<Box<dyn AsyncWrite + Send>>;

/// Streams obtained by attaching to a container
pub struct Attachment {
    pub output: OutputStream,
    pub input: InputSink,
}

// ============================================================================
// Wait
// ============================================================================

/// How a container's exit was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exited with a status code
    Completed(i64),
    /// Removed before the wait could observe the exit
    AlreadyGone,
    /// Wait ended without reporting a status
    Unknown,
}

impl WaitOutcome {
    /// Status reported to the caller; races map to success
    pub fn exit_code(&self) -> i32 {
        match self {
            WaitOutcome::Completed(code) => *code as i32,
            WaitOutcome::AlreadyGone | WaitOutcome::Unknown => 0,
        }
    }
}

/// A registered wait, running in its own task
pub struct WaitHandle {
    inner: WaitInner,
}

enum WaitInner {
    Task(JoinHandle<Result<WaitOutcome, DaemonError>>),
    Future(BoxFuture<'static, Result<WaitOutcome, DaemonError>>),
}

impl WaitHandle {
    pub fn from_task(task: JoinHandle<Result<WaitOutcome, DaemonError>>) -> Self {
        Self {
            inner: WaitInner::Task(task),
        }
    }

    pub fn from_future(future: BoxFuture<'static, Result<WaitOutcome, DaemonError>>) -> Self {
        Self {
            inner: WaitInner::Future(future),
        }
    }

    /// Resolve once the daemon reports the exit
    pub async fn outcome(self) -> Result<WaitOutcome, DaemonError> {
        match self.inner {
            WaitInner::Task(task) => match task.await {
                Ok(result) => result,
                Err(e) => Err(DaemonError::Other(format!("wait task failed: {}", e))),
            },
            WaitInner::Future(future) => future.await,
        }
    }
}

// ============================================================================
// Credentials
// ============================================================================

/// Registry login used for pulls
#[derive(Clone, PartialEq, Eq)]
pub struct PullCredentials {
    pub username: String,
    pub password: String,
    pub server: String,
}

impl std::fmt::Debug for PullCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullCredentials")
            .field("username", &self.username)
            .field("password", &"***")
            .field("server", &self.server)
            .finish()
    }
}

// ============================================================================
// ContainerDaemon
// ============================================================================

/// Operations the orchestrator needs from a container daemon
#[async_trait]
pub trait ContainerDaemon: Send + Sync {
    /// Create (but do not start) a container; returns its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String, DaemonError>;

    /// Attach to stdin/stdout/stderr of a created container
    async fn attach(&self, id: &str) -> Result<Attachment, DaemonError>;

    /// Register a wait for the container's exit
    ///
    /// Must resolve with the real status even when registered after the
    /// container has already stopped.
    fn wait(&self, id: &str) -> WaitHandle;

    async fn start(&self, id: &str) -> Result<(), DaemonError>;

    /// Graceful stop; the daemon kills after `timeout`
    async fn stop(&self, id: &str, timeout: Duration) -> Result<(), DaemonError>;

    async fn kill(&self, id: &str) -> Result<(), DaemonError>;

    async fn remove(&self, id: &str, force: bool) -> Result<(), DaemonError>;

    /// Exit state of a container whose wait did not report
    async fn exit_status(&self, id: &str) -> Result<WaitOutcome, DaemonError>;

    /// Every container known to the daemon, running or not
    async fn snapshot(&self) -> Result<ContainerSnapshot, DaemonError>;

    async fn image_exists(&self, reference: &str) -> Result<bool, DaemonError>;

    async fn pull(
        &self,
        reference: &str,
        credentials: Option<&PullCredentials>,
    ) -> Result<(), DaemonError>;
}

// ============================================================================
// DaemonError
// ============================================================================

/// Container daemon error types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DaemonError {
    /// Daemon socket not reachable
    Unavailable(String),
    /// Container does not exist (404)
    NotFound(String),
    ImageNotFound(String),
    CreateFailed(String),
    AttachFailed(String),
    StartFailed(String),
    PullFailed(String),
    Other(String),
}

impl std::fmt::Display for DaemonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable(msg) => write!(f, "Container daemon unavailable: {}", msg),
            Self::NotFound(id) => write!(f, "No such container: {}", id),
            Self::ImageNotFound(img) => write!(f, "Image not found: {}", img),
            Self::CreateFailed(msg) => write!(f, "Failed to create container: {}", msg),
            Self::AttachFailed(msg) => write!(f, "Failed to attach to container: {}", msg),
            Self::StartFailed(msg) => write!(f, "Failed to start container: {}", msg),
            Self::PullFailed(msg) => write!(f, "Failed to pull image: {}", msg),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for DaemonError {}

impl From<DaemonError> for r2r_foundation::Error {
    fn from(err: DaemonError) -> Self {
        r2r_foundation::Error::Daemon(err.to_string())
    }
}
