//! Per-run request context.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use relayrun_core::{ConversationId, TaskId};
use relayrun_worker_sdk::{ExecutionPolicy, LlmConfig, Worker, WorkerRun};

use crate::resource::EnvironmentTarget;
use crate::upload::UploadService;

/// Steps a worker may take unless the request says otherwise.
pub const DEFAULT_STEP_BUDGET: u32 = 20;

/// Header carrying the conversation id on every page request of the worker.
pub const SANDBOX_TASK_HEADER: &str = "x-sandbox-taskid";

/// Everything one run needs. Built by the caller, read-only once the run
/// has started.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub query: String,
    pub conversation_id: ConversationId,
    pub worker: Arc<dyn Worker>,
    pub llm: LlmConfig,
    pub policy: ExecutionPolicy,
    pub target: EnvironmentTarget,
    pub step_budget: u32,
    pub system_prompt: Option<String>,
    pub upload: Option<Arc<dyn UploadService>>,
    /// Artifacts touched at or after this instant belong to the run.
    pub started_at: DateTime<Utc>,
}

impl TaskContext {
    pub fn new(query: impl Into<String>, worker: Arc<dyn Worker>) -> Self {
        Self {
            task_id: TaskId::generate(),
            query: query.into(),
            conversation_id: ConversationId::default(),
            worker,
            llm: LlmConfig::default(),
            policy: ExecutionPolicy::default(),
            target: EnvironmentTarget::Local,
            step_budget: DEFAULT_STEP_BUDGET,
            system_prompt: None,
            upload: None,
            started_at: Utc::now(),
        }
    }

    pub fn with_task_id(mut self, task_id: TaskId) -> Self {
        self.task_id = task_id;
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = conversation_id;
        self
    }

    pub fn with_llm(mut self, llm: LlmConfig) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_policy(mut self, policy: ExecutionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_target(mut self, target: EnvironmentTarget) -> Self {
        self.target = target;
        self
    }

    pub fn with_step_budget(mut self, step_budget: u32) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_upload(mut self, upload: Arc<dyn UploadService>) -> Self {
        self.upload = Some(upload);
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// Worker parameters for an environment reachable at `cdp_url`.
    pub fn worker_run(&self, cdp_url: &str) -> WorkerRun {
        let mut extra_headers = HashMap::new();
        if !self.conversation_id.is_empty() {
            extra_headers.insert(
                SANDBOX_TASK_HEADER.to_string(),
                self.conversation_id.to_string(),
            );
        }

        WorkerRun {
            task_id: self.task_id.to_string(),
            query: self.query.clone(),
            cdp_url: cdp_url.to_string(),
            step_budget: self.step_budget,
            system_prompt: self.system_prompt.clone(),
            llm: self.llm.clone(),
            policy: self.policy.clone(),
            extra_headers,
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("task_id", &self.task_id)
            .field("query", &self.query)
            .field("conversation_id", &self.conversation_id)
            .field("llm", &self.llm)
            .field("policy", &self.policy)
            .field("target", &self.target)
            .field("step_budget", &self.step_budget)
            .field("system_prompt", &self.system_prompt)
            .field("upload", &self.upload.is_some())
            .field("started_at", &self.started_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayrun_worker_sdk::ScriptedWorker;

    #[test]
    fn test_worker_run_carries_conversation_header() {
        let ctx = TaskContext::new("find flights", Arc::new(ScriptedWorker::new(vec![])))
            .with_conversation_id(ConversationId::new("conv-7"))
            .with_step_budget(8)
            .with_system_prompt("be brief");
        let run = ctx.worker_run("http://127.0.0.1:9223");

        assert_eq!(run.step_budget, 8);
        assert_eq!(run.cdp_url, "http://127.0.0.1:9223");
        assert_eq!(run.system_prompt.as_deref(), Some("be brief"));
        assert_eq!(run.extra_headers.get(SANDBOX_TASK_HEADER).unwrap(), "conv-7");
    }

    #[test]
    fn test_defaults() {
        let ctx = TaskContext::new("q", Arc::new(ScriptedWorker::new(vec![])));
        assert_eq!(ctx.step_budget, DEFAULT_STEP_BUDGET);
        assert_eq!(ctx.target, EnvironmentTarget::Local);
        assert!(ctx.worker_run("x").extra_headers.is_empty());
    }
}
