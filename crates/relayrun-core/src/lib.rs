//! RelayRun Core Domain Types
//!
//! This crate contains the pure domain and wire types shared by the worker
//! SDK, the supervisor and the HTTP front. It has no dependencies on:
//! - Network/HTTP
//! - Async runtimes
//! - Process management
//!
//! Everything a client sees on the event stream is defined here.

pub mod error;
pub mod event;
pub mod file;
pub mod ids;
pub mod payload;
pub mod status;

// Re-export commonly used types
pub use error::CoreError;
pub use event::{ContentType, ReplyContentType, ReplyType, SseData, ERROR_SENTINEL, EXT_STATUS};
pub use file::{ErrData, FileChangeInfo, FileChangeRecord, FileChangeType, FileItem, FileType};
pub use ids::{ConversationId, TaskId};
pub use payload::{MessageActionInfo, MessageActionItem, MessageActionType, StepInfo};
pub use status::RunPhase;
