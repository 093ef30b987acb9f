//! A worker that replays a fixed script of steps.
//!
//! Useful for demos and tests where no real browser agent is available.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::WorkerError;
use crate::protocol::{StepCallback, Worker, WorkerRun};
use crate::types::{ActionOutcome, AgentAction, AgentOutput, BrowserState, HistoryItem, RunHistory};

/// One scripted step: what the worker "saw", what it chose, and what came of it.
#[derive(Debug, Clone)]
pub struct ScriptStep {
    pub state: BrowserState,
    pub output: AgentOutput,
    pub results: Vec<ActionOutcome>,
}

impl ScriptStep {
    /// Step with a goal and actions on the given page.
    pub fn new(url: impl Into<String>, goal: impl Into<String>, actions: Vec<AgentAction>) -> Self {
        Self {
            state: BrowserState {
                url: url.into(),
                ..Default::default()
            },
            output: AgentOutput {
                next_goal: goal.into(),
                actions,
                ..Default::default()
            },
            results: Vec::new(),
        }
    }

    /// Record an outcome in the history for this step.
    pub fn with_result(mut self, outcome: ActionOutcome) -> Self {
        self.results.push(outcome);
        self
    }
}

/// Replays [`ScriptStep`]s through the step callback, then returns their history.
pub struct ScriptedWorker {
    steps: Vec<ScriptStep>,
    step_delay: Duration,
    failure: Option<String>,
    stop: CancellationToken,
}

impl ScriptedWorker {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            step_delay: Duration::ZERO,
            failure: None,
            stop: CancellationToken::new(),
        }
    }

    /// Wait this long before each step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Raise `message` after all steps have been reported.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// A short browsing session answering `query`.
    pub fn demo(query: &str) -> Self {
        let answer = format!("Finished browsing for: {}", query);
        Self::new(vec![
            ScriptStep::new(
                "about:blank",
                "Search for the request",
                vec![AgentAction::SearchGoogle {
                    query: query.to_string(),
                }],
            )
            .with_result(ActionOutcome::Intermediate {
                extracted_content: Some(format!("Searched for \"{}\"", query)),
            }),
            ScriptStep::new(
                "https://www.baidu.com/s",
                "Open the most relevant result",
                vec![AgentAction::ClickElementByIndex { index: 1 }],
            )
            .with_result(ActionOutcome::Intermediate {
                extracted_content: None,
            }),
            ScriptStep::new(
                "https://example.com",
                "Report the findings",
                vec![AgentAction::Done {
                    text: answer.clone(),
                    success: true,
                }],
            )
            .with_result(ActionOutcome::Done {
                extracted_content: Some(answer),
            }),
        ])
        .with_step_delay(Duration::from_millis(300))
    }
}

#[async_trait]
impl Worker for ScriptedWorker {
    async fn run(
        &self,
        run: WorkerRun,
        callback: Arc<dyn StepCallback>,
    ) -> Result<RunHistory, WorkerError> {
        info!(task_id = %run.task_id, steps = self.steps.len(), "Starting scripted run");

        let mut history = RunHistory::default();
        for (i, step) in self.steps.iter().take(run.step_budget as usize).enumerate() {
            if !self.step_delay.is_zero() {
                tokio::select! {
                    _ = self.stop.cancelled() => return Err(WorkerError::Stopped),
                    _ = tokio::time::sleep(self.step_delay) => {}
                }
            }
            if self.stop.is_cancelled() {
                return Err(WorkerError::Stopped);
            }

            let step_number = i as u32 + 1;
            callback
                .on_step(step.state.clone(), step.output.clone(), step_number)
                .await;
            history.items.push(HistoryItem {
                step_number,
                results: step.results.clone(),
            });
        }

        match &self.failure {
            Some(message) => Err(WorkerError::Execution(message.clone())),
            None => Ok(history),
        }
    }

    fn stop(&self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::types::{ExecutionPolicy, LlmConfig};

    #[derive(Default)]
    struct Recorder {
        steps: Mutex<Vec<(u32, String)>>,
    }

    #[async_trait]
    impl StepCallback for Recorder {
        async fn on_step(&self, _state: BrowserState, output: AgentOutput, step_index: u32) {
            self.steps.lock().unwrap().push((step_index, output.next_goal));
        }
    }

    fn run(step_budget: u32) -> WorkerRun {
        WorkerRun {
            task_id: "t1".to_string(),
            query: "rust".to_string(),
            cdp_url: "http://127.0.0.1:9223".to_string(),
            step_budget,
            system_prompt: None,
            llm: LlmConfig::default(),
            policy: ExecutionPolicy::default(),
            extra_headers: HashMap::new(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_demo_reports_one_based_steps() {
        let recorder = Arc::new(Recorder::default());
        let history = ScriptedWorker::demo("rust")
            .run(run(20), recorder.clone())
            .await
            .unwrap();

        let steps = recorder.steps.lock().unwrap().clone();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].0, 1);
        assert_eq!(steps[2].1, "Report the findings");
        assert!(matches!(
            history.items[2].results[0],
            ActionOutcome::Done { .. }
        ));
    }

    #[tokio::test]
    async fn test_step_budget_limits_steps() {
        let recorder = Arc::new(Recorder::default());
        let worker = ScriptedWorker::new(vec![
            ScriptStep::new("a", "one", vec![]),
            ScriptStep::new("b", "two", vec![]),
        ]);
        let history = worker.run(run(1), recorder.clone()).await.unwrap();
        assert_eq!(history.items.len(), 1);
    }

    #[tokio::test]
    async fn test_failure_after_steps() {
        let recorder = Arc::new(Recorder::default());
        let worker = ScriptedWorker::new(vec![ScriptStep::new("a", "one", vec![])])
            .failing_with("llm quota exceeded");
        let err = worker.run(run(5), recorder.clone()).await.unwrap_err();

        assert!(matches!(err, WorkerError::Execution(ref m) if m == "llm quota exceeded"));
        assert_eq!(recorder.steps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_before_run() {
        let worker = ScriptedWorker::new(vec![ScriptStep::new("a", "one", vec![])]);
        worker.stop();
        let err = worker
            .run(run(5), Arc::new(Recorder::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::Stopped));
    }
}
