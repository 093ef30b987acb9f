//! Error types for the worker SDK.

use thiserror::Error;

/// Errors a worker can raise while running.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// Failed to spawn the agent process.
    #[error("Failed to spawn agent process: {0}")]
    SpawnError(#[from] std::io::Error),

    /// Agent process exited with an error.
    #[error("Agent process exited with error: {0}")]
    ProcessError(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Protocol error while talking to the agent.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// The agent reported a failure of its own.
    #[error("Agent execution failed: {0}")]
    Execution(String),

    /// The worker was asked to stop before it finished.
    #[error("Worker stopped")]
    Stopped,
}
