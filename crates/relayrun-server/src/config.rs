//! Server configuration.

use std::sync::Arc;
use std::time::Duration;

use relayrun_supervisor::{RemoteEndpoint, SupervisorConfig, DEFAULT_STEP_BUDGET};
use relayrun_worker_sdk::{ExecutionPolicy, LlmConfig, ProcessWorker, ScriptedWorker, Worker};

/// Which worker executes runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerKind {
    /// Replays a short canned session. No agent or model needed.
    Demo,
    /// Spawns the given agent command once per run.
    Process { command: String, args: Vec<String> },
}

impl WorkerKind {
    /// A fresh worker for one run.
    pub fn build(&self, query: &str) -> Arc<dyn Worker> {
        match self {
            Self::Demo => Arc::new(ScriptedWorker::demo(query)),
            Self::Process { command, args } => Arc::new(
                args.iter()
                    .fold(ProcessWorker::new(command), |worker, arg| worker.with_arg(arg)),
            ),
        }
    }
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP bind address.
    pub http_addr: String,

    pub supervisor: SupervisorConfig,

    pub worker: WorkerKind,

    /// Model settings used when a request carries none.
    pub llm: LlmConfig,

    /// Execution policy used when a request carries none.
    pub policy: ExecutionPolicy,

    /// Step budget used when a request carries none.
    pub step_budget: u32,

    /// Remote environment used when a request names none. Local when unset.
    pub browser_endpoint: Option<RemoteEndpoint>,

    /// Artifacts are mirrored to an in-memory store under this URL prefix.
    /// No artifact mirroring when unset.
    pub artifact_base_url: Option<String>,

    /// How long shutdown waits for outstanding cleanups.
    pub shutdown_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:8000".to_string(),
            supervisor: SupervisorConfig::default(),
            worker: WorkerKind::Demo,
            llm: LlmConfig::default(),
            policy: ExecutionPolicy::default(),
            step_budget: DEFAULT_STEP_BUDGET,
            browser_endpoint: None,
            artifact_base_url: Some("memory://artifacts".to_string()),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.step_budget, 20);
        assert_eq!(config.worker, WorkerKind::Demo);
        assert!(config.browser_endpoint.is_none());
    }
}
