//! JSON payloads carried in the `content` field of step events.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Plain progress update for one worker step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    pub step_number: u32,
    pub goal: String,
}

/// Kind of action the user has to take. Serialized as its integer code.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum MessageActionType {
    /// The page needs the user to sign in.
    #[default]
    WebPageAuthorization,
}

impl From<MessageActionType> for u8 {
    fn from(value: MessageActionType) -> Self {
        match value {
            MessageActionType::WebPageAuthorization => 1,
        }
    }
}

impl TryFrom<u8> for MessageActionType {
    type Error = CoreError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(Self::WebPageAuthorization),
            _ => Err(CoreError::UnknownCode {
                kind: "message_action_type",
                code,
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageActionItem {
    #[serde(rename = "type")]
    pub action_type: MessageActionType,
}

/// Action-required marker emitted instead of a progress update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageActionInfo {
    pub actions: Vec<MessageActionItem>,
}

impl MessageActionInfo {
    /// Marker asking the user to authorize the current page.
    pub fn login_required() -> Self {
        Self {
            actions: vec![MessageActionItem::default()],
        }
    }
}
