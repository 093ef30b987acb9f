//! The event placed on the relay and yielded to the client.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::ids::TaskId;

/// Literal a producer puts on the relay instead of a structured event to
/// signal abrupt failure.
pub const ERROR_SENTINEL: &str = "error";

/// Kind of content carried by an event. Serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ContentType {
    /// Plain text.
    Text,
    /// Applet widget.
    AppletWidget,
    /// Loading tips.
    LoadingTips,
    /// Card.
    Card,
    /// Verbose details.
    Verbose,
    /// Usage accounting.
    Usage,
    /// Websocket connection info.
    WebsocketInfo,
    /// Aggregate file change set.
    FileChangeInfo,
    /// Action required from the user.
    ActionInfo,
}

impl From<ContentType> for u8 {
    fn from(value: ContentType) -> Self {
        match value {
            ContentType::Text => 0,
            ContentType::AppletWidget => 1,
            ContentType::LoadingTips => 2,
            ContentType::Card => 3,
            ContentType::Verbose => 4,
            ContentType::Usage => 10,
            ContentType::WebsocketInfo => 20,
            ContentType::FileChangeInfo => 21,
            ContentType::ActionInfo => 22,
        }
    }
}

impl TryFrom<u8> for ContentType {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Text),
            1 => Ok(Self::AppletWidget),
            2 => Ok(Self::LoadingTips),
            3 => Ok(Self::Card),
            4 => Ok(Self::Verbose),
            10 => Ok(Self::Usage),
            20 => Ok(Self::WebsocketInfo),
            21 => Ok(Self::FileChangeInfo),
            22 => Ok(Self::ActionInfo),
            _ => Err(CoreError::UnknownCode {
                kind: "content_type",
                code,
            }),
        }
    }
}

/// How the client should classify a reply. Serialized as its integer code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ReplyType {
    /// Final answer shown to the user.
    #[default]
    Answer,
    /// Intermediate progress detail.
    Verbose,
    /// Output of a tool invocation.
    ToolOutput,
    /// Placeholder to be replaced by a later message.
    Placeholder,
}

impl From<ReplyType> for u8 {
    fn from(value: ReplyType) -> Self {
        match value {
            ReplyType::Answer => 0,
            ReplyType::Verbose => 1,
            ReplyType::ToolOutput => 2,
            ReplyType::Placeholder => 3,
        }
    }
}

impl TryFrom<u8> for ReplyType {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Answer),
            1 => Ok(Self::Verbose),
            2 => Ok(Self::ToolOutput),
            3 => Ok(Self::Placeholder),
            _ => Err(CoreError::UnknownCode {
                kind: "reply_type",
                code,
            }),
        }
    }
}

/// Nested reply classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyContentType {
    pub content_type: ContentType,
    pub reply_type: ReplyType,
}

/// One stream chunk. Immutable once built; emission order is the only order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SseData {
    pub stream_id: String,
    pub content: String,
    pub content_type: ContentType,
    pub reply_content_type: ReplyContentType,
    /// No further logical message follows.
    pub is_last_msg: bool,
    /// The run is over.
    pub is_finish: bool,
    /// No further fragment of the current message follows.
    pub is_last_packet_in_msg: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_for_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_body: Option<String>,
}

/// `ext` key carrying the terminal status of a run.
pub const EXT_STATUS: &str = "status";

impl SseData {
    /// Create a non-terminal event.
    pub fn new(
        stream_id: &TaskId,
        content: impl Into<String>,
        content_type: ContentType,
        reply_type: ReplyType,
    ) -> Self {
        Self {
            stream_id: stream_id.as_str().to_string(),
            content: content.into(),
            content_type,
            reply_content_type: ReplyContentType {
                content_type,
                reply_type,
            },
            is_last_msg: false,
            is_finish: false,
            is_last_packet_in_msg: false,
            response_for_model: None,
            ext: None,
            card_body: None,
        }
    }

    /// Progress update for one worker step.
    pub fn progress(stream_id: &TaskId, content: impl Into<String>) -> Self {
        Self::new(stream_id, content, ContentType::Text, ReplyType::Verbose)
    }

    /// Step that needs the user to act (e.g. log in) before the worker can go on.
    pub fn action_required(stream_id: &TaskId, content: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            content,
            ContentType::ActionInfo,
            ReplyType::Verbose,
        )
    }

    /// Aggregate change set of the artifacts touched by the run.
    pub fn file_change(stream_id: &TaskId, content: impl Into<String>) -> Self {
        Self::new(
            stream_id,
            content,
            ContentType::FileChangeInfo,
            ReplyType::ToolOutput,
        )
    }

    /// Terminal event of a successful run.
    pub fn finished(stream_id: &TaskId, result: impl Into<String>) -> Self {
        Self::new(stream_id, result, ContentType::Text, ReplyType::Answer)
            .into_terminal("completed")
    }

    /// Terminal event of a failed run. `content` is the error description.
    pub fn failed(stream_id: &TaskId, error: impl Into<String>) -> Self {
        Self::new(stream_id, error, ContentType::Text, ReplyType::Answer).into_terminal("failed")
    }

    fn into_terminal(mut self, status: &str) -> Self {
        self.is_finish = true;
        self.is_last_msg = true;
        self.is_last_packet_in_msg = true;
        self.ext
            .get_or_insert_with(HashMap::new)
            .insert(EXT_STATUS.to_string(), status.to_string());
        self
    }

    /// Attach a human-readable summary for the calling model.
    pub fn with_response_for_model(mut self, text: impl Into<String>) -> Self {
        self.response_for_model = Some(text.into());
        self
    }

    /// Attach an extension key.
    pub fn with_ext(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// True for a terminal event of a failed run.
    pub fn is_failure(&self) -> bool {
        self.is_finish
            && self
                .ext
                .as_ref()
                .and_then(|ext| ext.get(EXT_STATUS))
                .map(|s| s == "failed")
                .unwrap_or(false)
    }

    /// Encode as one SSE frame: `data: <json>\n\n`.
    pub fn to_sse_frame(&self) -> Result<String, CoreError> {
        Ok(format!("data: {}\n\n", serde_json::to_string(self)?))
    }
}
