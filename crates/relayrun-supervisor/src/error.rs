//! Supervisor error types.

use relayrun_core::CoreError;
use relayrun_worker_sdk::WorkerError;
use thiserror::Error;

/// Failures acquiring or releasing an execution environment.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The browser process could not be started or stopped.
    #[error("Browser process error: {0}")]
    Process(#[from] std::io::Error),

    /// The browser never answered its readiness probe.
    #[error("Browser on port {port} not ready: {reason}")]
    NotReady { port: u16, reason: String },

    /// The process-wide port space is used up.
    #[error("No debugging ports left to allocate")]
    PortsExhausted,

    /// Network failure talking to a remote environment.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The remote endpoint answered with a non-success status.
    #[error("Remote environment returned {status}: {body}")]
    UpstreamStatus { status: u16, body: String },

    /// A URL could not be parsed or rewritten.
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// The lookup response carried no debugger URL.
    #[error("Remote environment did not report a debugger URL")]
    MissingDebuggerUrl,
}

/// Failures of the artifact upload service.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload of '{name}' failed: {reason}")]
    Upload { name: String, reason: String },
}

/// Run-level failures, one variant per way a run can go wrong.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// No execution environment could be acquired.
    #[error("Failed to acquire execution environment: {0}")]
    ResourceAcquisition(ResourceError),

    /// The remote environment lookup was answered with an error.
    #[error("Remote environment lookup failed: {0}")]
    UpstreamProtocol(ResourceError),

    /// The worker failed after streaming began.
    #[error("Worker execution failed: {0}")]
    WorkerExecution(String),

    /// Draining or yielding events failed.
    #[error("Streaming error: {0}")]
    Streaming(String),

    /// Release or reconciliation failed.
    #[error("Cleanup error: {0}")]
    Cleanup(String),

    /// Illegal phase transition or payload encoding failure.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl SupervisorError {
    /// True for failures that happen before any worker started.
    pub fn is_acquisition(&self) -> bool {
        matches!(self, Self::ResourceAcquisition(_) | Self::UpstreamProtocol(_))
    }
}

impl From<ResourceError> for SupervisorError {
    fn from(e: ResourceError) -> Self {
        match e {
            ResourceError::UpstreamStatus { .. } => Self::UpstreamProtocol(e),
            other => Self::ResourceAcquisition(other),
        }
    }
}

impl From<WorkerError> for SupervisorError {
    fn from(e: WorkerError) -> Self {
        Self::WorkerExecution(e.to_string())
    }
}
