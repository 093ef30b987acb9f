//! RelayRun Server Library
//!
//! HTTP front of the supervisor: accepts run requests and streams each
//! run's events back as server-sent events.

pub mod config;
pub mod http;
pub mod state;

pub use config::{ServerConfig, WorkerKind};
pub use state::AppState;
