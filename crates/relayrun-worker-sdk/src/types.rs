//! Type definitions for the worker step protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Environment state the worker perceived before choosing its next actions.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct BrowserState {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub tabs: Vec<TabInfo>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TabInfo {
    pub page_id: u32,
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// What the worker decided to do in one step.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct AgentOutput {
    #[serde(default)]
    pub evaluation_previous_goal: Option<String>,
    #[serde(default)]
    pub memory: Option<String>,
    #[serde(default)]
    pub next_goal: String,
    #[serde(default, alias = "action")]
    pub actions: Vec<AgentAction>,
}

/// One action chosen by the worker.
///
/// On the wire each action is an object with a single key naming the
/// action, e.g. `{"go_to_url": {"url": "https://example.com"}}`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    /// Navigate the current tab.
    GoToUrl { url: String },

    /// Run a web search in the current tab.
    SearchGoogle { query: String },

    /// Click an indexed element.
    ClickElementByIndex { index: u32 },

    /// Type into an indexed element.
    InputText { index: u32, text: String },

    /// Scroll the page down.
    ScrollDown {
        #[serde(default)]
        amount: Option<i64>,
    },

    /// Scroll the page up.
    ScrollUp {
        #[serde(default)]
        amount: Option<i64>,
    },

    /// Switch to another tab.
    SwitchTab { page_id: u32 },

    /// Extract page content towards a goal.
    ExtractContent {
        goal: String,
        #[serde(default)]
        include_links: bool,
    },

    /// Pause the agent.
    Pause { reason: String },

    /// The page requires authentication; wait for the user to log in.
    WaitForLogin {
        #[serde(default = "default_login_timeout")]
        timeout: u64,
        #[serde(default = "default_login_check_interval")]
        check_interval: u64,
    },

    /// Create or overwrite a managed file.
    WriteFile { file_name: String, content: String },

    /// Append to a managed file.
    AppendFile { file_name: String, content: String },

    /// Replace a string inside a managed file.
    ReplaceFileStr {
        file_name: String,
        old_str: String,
        new_str: String,
    },

    /// Read a managed file.
    ReadFile { file_name: String },

    /// Finish the task.
    Done {
        text: String,
        #[serde(default)]
        success: bool,
    },

    /// Action this version does not know (fallback).
    #[serde(untagged)]
    Unknown(Value),
}

fn default_login_timeout() -> u64 {
    300
}

fn default_login_check_interval() -> u64 {
    5
}

/// A change to a managed artifact requested by an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactMutation<'a> {
    Write { file_name: &'a str, content: &'a str },
    Append { file_name: &'a str, content: &'a str },
    Replace {
        file_name: &'a str,
        old_str: &'a str,
        new_str: &'a str,
    },
}

impl<'a> ArtifactMutation<'a> {
    pub fn file_name(&self) -> &'a str {
        match *self {
            Self::Write { file_name, .. }
            | Self::Append { file_name, .. }
            | Self::Replace { file_name, .. } => file_name,
        }
    }
}

impl AgentAction {
    /// Wire name of the action.
    pub fn name(&self) -> &str {
        match self {
            Self::GoToUrl { .. } => "go_to_url",
            Self::SearchGoogle { .. } => "search_google",
            Self::ClickElementByIndex { .. } => "click_element_by_index",
            Self::InputText { .. } => "input_text",
            Self::ScrollDown { .. } => "scroll_down",
            Self::ScrollUp { .. } => "scroll_up",
            Self::SwitchTab { .. } => "switch_tab",
            Self::ExtractContent { .. } => "extract_content",
            Self::Pause { .. } => "pause",
            Self::WaitForLogin { .. } => "wait_for_login",
            Self::WriteFile { .. } => "write_file",
            Self::AppendFile { .. } => "append_file",
            Self::ReplaceFileStr { .. } => "replace_file_str",
            Self::ReadFile { .. } => "read_file",
            Self::Done { .. } => "done",
            Self::Unknown(value) => value
                .as_object()
                .and_then(|obj| obj.keys().next())
                .map(String::as_str)
                .unwrap_or("unknown"),
        }
    }

    /// True if the action means the user has to authenticate first.
    pub fn requires_login(&self) -> bool {
        matches!(self, Self::WaitForLogin { .. })
    }

    /// The artifact change this action makes, if any.
    pub fn artifact_mutation(&self) -> Option<ArtifactMutation<'_>> {
        match self {
            Self::WriteFile { file_name, content } => Some(ArtifactMutation::Write {
                file_name,
                content,
            }),
            Self::AppendFile { file_name, content } => Some(ArtifactMutation::Append {
                file_name,
                content,
            }),
            Self::ReplaceFileStr {
                file_name,
                old_str,
                new_str,
            } => Some(ArtifactMutation::Replace {
                file_name,
                old_str,
                new_str,
            }),
            _ => None,
        }
    }
}

/// Result of one executed action, as recorded in the run history.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Terminal success: the worker declared the task done.
    Done {
        #[serde(default)]
        extracted_content: Option<String>,
    },

    /// Terminal, but not a success (budget exhausted, unrecoverable error).
    Halted {
        #[serde(default)]
        extracted_content: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },

    /// Any non-terminal action.
    Intermediate {
        #[serde(default)]
        extracted_content: Option<String>,
    },
}

impl ActionOutcome {
    /// Text the action extracted, if any.
    pub fn extracted_content(&self) -> Option<&str> {
        match self {
            Self::Done { extracted_content }
            | Self::Halted {
                extracted_content, ..
            }
            | Self::Intermediate { extracted_content } => extracted_content.as_deref(),
        }
    }
}

/// One step of the run history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct HistoryItem {
    #[serde(default)]
    pub step_number: u32,
    #[serde(default)]
    pub results: Vec<ActionOutcome>,
}

/// Everything the worker did, returned when `run` completes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct RunHistory {
    #[serde(default)]
    pub items: Vec<HistoryItem>,
}

/// Model provider flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmType {
    #[serde(rename = "openai")]
    OpenAi,
    DeepSeek,
    #[default]
    Ark,
}

impl LlmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::DeepSeek => "deepseek",
            Self::Ark => "ark",
        }
    }
}

/// Model settings handed to the worker.
#[derive(Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub llm_type: LlmType,
    #[serde(default)]
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    /// Model used for page content extraction.
    #[serde(default)]
    pub extract_model_id: String,
    #[serde(default)]
    pub base_url: Option<String>,
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("llm_type", &self.llm_type)
            .field("model_id", &self.model_id)
            .field("api_key", &"<redacted>")
            .field("extract_model_id", &self.extract_model_id)
            .field("base_url", &self.base_url)
            .finish()
    }
}

/// How the worker is allowed to operate.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ExecutionPolicy {
    #[serde(default)]
    pub use_vision: bool,
    #[serde(default = "default_tool_calling_method")]
    pub tool_calling_method: String,
    #[serde(default = "default_true")]
    pub highlight_elements: bool,
}

fn default_tool_calling_method() -> String {
    "function_calling".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            use_vision: false,
            tool_calling_method: default_tool_calling_method(),
            highlight_elements: true,
        }
    }
}

/// One line printed by an external agent process.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// A unit of work finished.
    Step {
        #[serde(default)]
        state: BrowserState,
        output: AgentOutput,
        step: u32,
    },

    /// The run finished; carries the full history.
    Result { history: RunHistory },

    /// The agent failed.
    Error { message: String },

    /// Unknown message type (fallback).
    #[serde(untagged)]
    Unknown(Value),
}
