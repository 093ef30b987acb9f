//! Worker SDK for RelayRun
//!
//! This crate defines the boundary between the supervisor and the
//! browser-automation worker: the typed step protocol the worker reports
//! in, the [`Worker`] and [`StepCallback`] traits, and two adapters.
//!
//! - [`ProcessWorker`] runs an external agent process that prints one JSON
//!   message per line on stdout.
//! - [`ScriptedWorker`] replays a fixed list of steps. Used for demos and
//!   tests.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use relayrun_worker_sdk::{ProcessWorker, StepCallback, Worker, WorkerRun};
//!
//! async fn run(run: WorkerRun, callback: Arc<dyn StepCallback>) -> Result<(), Box<dyn std::error::Error>> {
//!     let worker = ProcessWorker::new("browser-agent");
//!     let history = worker.run(run, callback).await?;
//!     println!("{} steps", history.items.len());
//!     Ok(())
//! }
//! ```

mod error;
mod executor;
mod protocol;
mod scripted;
mod types;

// Re-export main types
pub use error::WorkerError;
pub use executor::ProcessWorker;
pub use protocol::{StepCallback, Worker, WorkerRun};
pub use scripted::{ScriptStep, ScriptedWorker};
pub use types::{
    ActionOutcome, AgentAction, AgentOutput, ArtifactMutation, BrowserState, ExecutionPolicy,
    HistoryItem, LlmConfig, LlmType, RunHistory, TabInfo, WorkerMessage,
};
