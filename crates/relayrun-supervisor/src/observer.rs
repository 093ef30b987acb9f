//! Turns worker steps into stream events.
//!
//! One event per step: an action-required marker when any chosen action
//! asks the user to log in, a progress update otherwise. Artifact writes
//! are forwarded to the upload service as they happen.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use relayrun_core::{CoreError, MessageActionInfo, SseData, StepInfo, TaskId};
use relayrun_worker_sdk::{AgentAction, AgentOutput, ArtifactMutation, BrowserState, StepCallback};
use tracing::{debug, error, warn};

use crate::i18n::Locale;
use crate::relay::RelaySender;
use crate::upload::UploadService;

/// Step callback bound to one run.
pub struct StepObserver {
    task_id: TaskId,
    relay: RelaySender,
    upload: Option<Arc<dyn UploadService>>,
    locale: Locale,
    /// Latest content of every artifact written during the run.
    artifacts: Mutex<HashMap<String, String>>,
}

impl StepObserver {
    pub fn new(
        task_id: TaskId,
        relay: RelaySender,
        upload: Option<Arc<dyn UploadService>>,
        locale: Locale,
    ) -> Self {
        Self {
            task_id,
            relay,
            upload,
            locale,
            artifacts: Mutex::new(HashMap::new()),
        }
    }

    /// Build the event for one step. Worker steps are one-based; the
    /// emitted step number is zero-based.
    pub fn classify(&self, output: &AgentOutput, step_index: u32) -> Result<SseData, CoreError> {
        if output.actions.iter().any(AgentAction::requires_login) {
            let content = serde_json::to_string(&MessageActionInfo::login_required())?;
            return Ok(SseData::action_required(&self.task_id, content)
                .with_response_for_model(self.locale.login_required()));
        }

        let step = StepInfo {
            step_number: step_index.saturating_sub(1),
            goal: output.next_goal.clone(),
        };
        let summary = self.locale.step_progress(step.step_number, &step.goal);
        Ok(SseData::progress(&self.task_id, serde_json::to_string(&step)?)
            .with_response_for_model(summary))
    }

    /// Run-scoped name under which an artifact is uploaded.
    pub fn artifact_name(&self, file_name: &str) -> String {
        format!("{}/{}", self.task_id, file_name)
    }

    /// Apply a mutation to the mirror and return the artifact's new content.
    fn apply(&self, mutation: ArtifactMutation<'_>) -> Option<String> {
        let Ok(mut artifacts) = self.artifacts.lock() else {
            error!(task_id = %self.task_id, "Artifact mirror poisoned");
            return None;
        };
        match mutation {
            ArtifactMutation::Write { file_name, content } => {
                artifacts.insert(file_name.to_string(), content.to_string());
                Some(content.to_string())
            }
            ArtifactMutation::Append { file_name, content } => {
                let current = artifacts.entry(file_name.to_string()).or_default();
                current.push_str(content);
                Some(current.clone())
            }
            ArtifactMutation::Replace {
                file_name,
                old_str,
                new_str,
            } => {
                let Some(current) = artifacts.get_mut(file_name) else {
                    warn!(
                        task_id = %self.task_id,
                        file_name = %file_name,
                        "Patch to unknown artifact, not uploading"
                    );
                    return None;
                };
                *current = current.replace(old_str, new_str);
                Some(current.clone())
            }
        }
    }

    async fn forward_artifacts(&self, upload: &dyn UploadService, actions: &[AgentAction]) {
        for mutation in actions.iter().filter_map(AgentAction::artifact_mutation) {
            let Some(content) = self.apply(mutation) else {
                continue;
            };
            let name = self.artifact_name(mutation.file_name());
            match upload.upload_file(&content, &name).await {
                Ok(()) => debug!(task_id = %self.task_id, name = %name, "Uploaded artifact"),
                Err(e) => warn!(task_id = %self.task_id, name = %name, error = %e, "Artifact upload failed"),
            }
        }
    }
}

#[async_trait]
impl StepCallback for StepObserver {
    async fn on_step(&self, state: BrowserState, output: AgentOutput, step_index: u32) {
        debug!(
            task_id = %self.task_id,
            step = step_index,
            url = %state.url,
            actions = output.actions.len(),
            "Worker step"
        );

        let event = match self.classify(&output, step_index) {
            Ok(event) => event,
            Err(e) => {
                error!(task_id = %self.task_id, error = %e, "Failed to encode step event");
                if self.relay.fail().await.is_err() {
                    debug!(task_id = %self.task_id, "Relay closed, dropping failure signal");
                }
                return;
            }
        };
        let login_required = output.actions.iter().any(AgentAction::requires_login);

        if self.relay.push(event).await.is_err() {
            debug!(task_id = %self.task_id, step = step_index, "Relay closed, dropping step event");
            return;
        }

        if login_required {
            return;
        }
        if let Some(upload) = &self.upload {
            self.forward_artifacts(upload.as_ref(), &output.actions).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{EventRelay, RelayMessage, RelayReceiver};
    use crate::upload::InMemoryUploadService;
    use relayrun_core::ContentType;

    fn observer(
        upload: Option<Arc<dyn UploadService>>,
    ) -> (StepObserver, RelayReceiver) {
        let (tx, rx) = EventRelay::bounded(16);
        (
            StepObserver::new(TaskId::new("t1"), tx, upload, Locale::En),
            rx,
        )
    }

    fn output(goal: &str, actions: Vec<AgentAction>) -> AgentOutput {
        AgentOutput {
            next_goal: goal.to_string(),
            actions,
            ..Default::default()
        }
    }

    fn next_event(rx: &mut RelayReceiver) -> SseData {
        match rx.try_pop() {
            Some(RelayMessage::Event(event)) => event,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_progress_step_number_is_zero_based() {
        let (observer, mut rx) = observer(None);
        observer
            .on_step(
                BrowserState::default(),
                output("Open the page", vec![AgentAction::GoToUrl {
                    url: "https://example.com".to_string(),
                }]),
                1,
            )
            .await;

        let event = next_event(&mut rx);
        assert_eq!(event.content_type, ContentType::Text);
        let step: StepInfo = serde_json::from_str(&event.content).unwrap();
        assert_eq!(step.step_number, 0);
        assert_eq!(step.goal, "Open the page");
        assert_eq!(event.response_for_model.as_deref(), Some("Step 0: Open the page"));
    }

    #[tokio::test]
    async fn test_login_step_emits_action_required_and_skips_upload() {
        let upload = Arc::new(InMemoryUploadService::default());
        let (observer, mut rx) = observer(Some(upload.clone()));
        observer
            .on_step(
                BrowserState::default(),
                output(
                    "Wait for the user",
                    vec![
                        AgentAction::WaitForLogin {
                            timeout: 300,
                            check_interval: 5,
                        },
                        AgentAction::WriteFile {
                            file_name: "notes.md".to_string(),
                            content: "draft".to_string(),
                        },
                    ],
                ),
                4,
            )
            .await;

        let event = next_event(&mut rx);
        assert_eq!(event.content_type, ContentType::ActionInfo);
        assert_eq!(event.content, r#"{"actions":[{"type":1}]}"#);
        assert!(upload.list_files().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_artifact_mutations_upload_resulting_content() {
        let upload = Arc::new(InMemoryUploadService::default());
        let (observer, mut rx) = observer(Some(upload.clone()));
        let steps = vec![
            AgentAction::WriteFile {
                file_name: "report.md".to_string(),
                content: "# Report\n".to_string(),
            },
            AgentAction::AppendFile {
                file_name: "report.md".to_string(),
                content: "- item TBD\n".to_string(),
            },
            AgentAction::ReplaceFileStr {
                file_name: "report.md".to_string(),
                old_str: "TBD".to_string(),
                new_str: "done".to_string(),
            },
            AgentAction::ReplaceFileStr {
                file_name: "missing.md".to_string(),
                old_str: "a".to_string(),
                new_str: "b".to_string(),
            },
        ];
        for (i, action) in steps.into_iter().enumerate() {
            observer
                .on_step(BrowserState::default(), output("write", vec![action]), i as u32 + 1)
                .await;
            next_event(&mut rx);
        }

        let files = upload.list_files().await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].file_name, "t1/report.md");
        assert_eq!(
            upload.content("t1/report.md").await.unwrap(),
            "# Report\n- item done\n"
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_plain_progress() {
        let (observer, mut rx) = observer(None);
        let action: AgentAction =
            serde_json::from_value(serde_json::json!({"open_tab": {"url": "x"}})).unwrap();
        observer
            .on_step(BrowserState::default(), output("New tab", vec![action]), 2)
            .await;
        assert_eq!(next_event(&mut rx).content_type, ContentType::Text);
    }
}
