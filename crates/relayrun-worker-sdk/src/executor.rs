//! Worker that drives an external agent process.
//!
//! The agent is spawned once per run and reports progress as JSON lines on
//! stdout (see [`WorkerMessage`]). Stderr is forwarded to the log.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::protocol::{StepCallback, Worker, WorkerRun};
use crate::types::{RunHistory, WorkerMessage};

/// Executor for external browser agents.
///
/// # Example
///
/// ```rust,no_run
/// use relayrun_worker_sdk::ProcessWorker;
///
/// let worker = ProcessWorker::new("browser-agent")
///     .with_arg("--quiet")
///     .with_env("ARK_BASE_URL", "https://ark.example.com/api/v3");
/// ```
#[derive(Debug, Clone)]
pub struct ProcessWorker {
    /// Path to the agent executable.
    agent_path: String,

    /// Arguments placed before the run arguments.
    args: Vec<String>,

    /// Additional environment variables.
    env_vars: Vec<(String, String)>,

    /// Cancelled by `stop()`.
    stop: CancellationToken,
}

impl ProcessWorker {
    /// Create a new worker for the given agent executable.
    pub fn new(agent_path: impl Into<String>) -> Self {
        Self {
            agent_path: agent_path.into(),
            args: Vec::new(),
            env_vars: Vec::new(),
            stop: CancellationToken::new(),
        }
    }

    /// Add a leading argument.
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add an environment variable.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    fn build_command(&self, run: &WorkerRun) -> Result<Command, WorkerError> {
        let mut cmd = Command::new(&self.agent_path);
        cmd.args(&self.args)
            .arg("--task")
            .arg(&run.query)
            .arg("--task-id")
            .arg(&run.task_id)
            .arg("--cdp-url")
            .arg(&run.cdp_url)
            .arg("--max-steps")
            .arg(run.step_budget.to_string());

        if let Some(prompt) = &run.system_prompt {
            cmd.arg("--system-prompt").arg(prompt);
        }

        cmd.env("LLM_TYPE", run.llm.llm_type.as_str())
            .env("LLM_MODEL_ID", &run.llm.model_id)
            .env("LLM_API_KEY", &run.llm.api_key)
            .env("LLM_EXTRACT_MODEL_ID", &run.llm.extract_model_id)
            .env("USE_VISION", run.policy.use_vision.to_string())
            .env("TOOL_CALLING_METHOD", &run.policy.tool_calling_method)
            .env(
                "HIGHLIGHT_ELEMENTS",
                run.policy.highlight_elements.to_string(),
            )
            .env("EXTRA_HTTP_HEADERS", serde_json::to_string(&run.extra_headers)?);
        if let Some(base_url) = &run.llm.base_url {
            cmd.env("LLM_BASE_URL", base_url);
        }
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        Ok(cmd)
    }
}

#[async_trait]
impl Worker for ProcessWorker {
    async fn run(
        &self,
        run: WorkerRun,
        callback: Arc<dyn StepCallback>,
    ) -> Result<RunHistory, WorkerError> {
        info!(
            task_id = %run.task_id,
            agent_path = %self.agent_path,
            step_budget = run.step_budget,
            "Spawning agent process"
        );

        let mut cmd = self.build_command(&run)?;
        debug!("Full command: {:?}", cmd);

        let mut child = cmd.spawn().map_err(|e| {
            error!(error = %e, "Failed to spawn agent process");
            e
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WorkerError::ProtocolError("Failed to get stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| WorkerError::ProtocolError("Failed to get stderr".to_string()))?;

        // Spawn stderr reader for logging
        let task_id = run.task_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            warn!(task_id = %task_id, stderr = %trimmed, "Agent stderr");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!(task_id = %task_id, error = %e, "Error reading agent stderr");
                        break;
                    }
                }
            }
        });

        // Steps are handled inline so a suspended callback holds the agent back.
        let mut lines = BufReader::new(stdout).lines();
        let mut history = None;
        loop {
            let line = tokio::select! {
                _ = self.stop.cancelled() => {
                    info!(task_id = %run.task_id, "Stop requested, killing agent process");
                    if let Err(e) = child.kill().await {
                        warn!(task_id = %run.task_id, error = %e, "Failed to kill agent process");
                    }
                    return Err(WorkerError::Stopped);
                }
                line = lines.next_line() => line?,
            };

            let Some(line) = line else {
                debug!(task_id = %run.task_id, "Agent stdout closed (EOF)");
                break;
            };
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<WorkerMessage>(trimmed) {
                Ok(WorkerMessage::Step {
                    state,
                    output,
                    step,
                }) => {
                    callback.on_step(state, output, step).await;
                }
                Ok(WorkerMessage::Result { history: reported }) => {
                    history = Some(reported);
                }
                Ok(WorkerMessage::Error { message }) => {
                    return Err(WorkerError::Execution(message));
                }
                Ok(WorkerMessage::Unknown(value)) => {
                    debug!(task_id = %run.task_id, message = %value, "Ignoring unknown agent message");
                }
                Err(e) => {
                    let preview: String = trimmed.chars().take(200).collect();
                    warn!(task_id = %run.task_id, error = %e, preview = %preview, "Failed to parse agent message");
                }
            }
        }

        let status = child.wait().await?;
        let exit_code = status.code().unwrap_or(-1);
        info!(task_id = %run.task_id, exit_code, success = status.success(), "Agent process exited");

        if !status.success() {
            return Err(WorkerError::ProcessError(format!(
                "agent exited with code {}",
                exit_code
            )));
        }

        history.ok_or_else(|| {
            WorkerError::ProtocolError("agent exited without reporting a result".to_string())
        })
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}
