//! Traits at the seam between the supervisor and a worker.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::WorkerError;
use crate::types::{AgentOutput, BrowserState, ExecutionPolicy, LlmConfig, RunHistory};

/// Everything a worker needs to execute one run.
#[derive(Debug, Clone)]
pub struct WorkerRun {
    /// Run identifier, for correlation in logs.
    pub task_id: String,
    /// The user's request.
    pub query: String,
    /// Connection URL of the acquired execution environment (CDP).
    pub cdp_url: String,
    /// Maximum number of steps the worker may take.
    pub step_budget: u32,
    /// Replaces the worker's default system prompt when set.
    pub system_prompt: Option<String>,
    pub llm: LlmConfig,
    pub policy: ExecutionPolicy,
    /// Extra HTTP headers the worker sends with every page request.
    pub extra_headers: HashMap<String, String>,
}

/// Called by the worker after every unit of work.
///
/// Implementations may suspend (e.g. on a full queue); the worker must
/// await the call before starting its next step.
#[async_trait]
pub trait StepCallback: Send + Sync {
    async fn on_step(&self, state: BrowserState, output: AgentOutput, step_index: u32);
}

/// A browser-automation worker.
///
/// An instance serves one run: once stopped it stays stopped.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Execute the run to completion, reporting each step to `callback`.
    async fn run(
        &self,
        run: WorkerRun,
        callback: Arc<dyn StepCallback>,
    ) -> Result<RunHistory, WorkerError>;

    /// Ask the worker to halt. Idempotent and non-blocking.
    fn stop(&self);
}
