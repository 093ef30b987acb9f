//! Shared application state.

use std::sync::Arc;

use relayrun_supervisor::TaskSupervisor;

use crate::config::ServerConfig;

/// Shared application state.
pub struct AppState {
    pub config: ServerConfig,

    /// Starts runs and tracks their cleanup.
    pub supervisor: TaskSupervisor,
}

impl AppState {
    /// Create a new AppState wrapped in Arc, acquiring real browsers.
    pub fn new(config: ServerConfig) -> Arc<Self> {
        let supervisor = TaskSupervisor::new(config.supervisor.clone());
        Self::with_supervisor(config, supervisor)
    }

    /// Create a new AppState around an existing supervisor.
    pub fn with_supervisor(config: ServerConfig, supervisor: TaskSupervisor) -> Arc<Self> {
        Arc::new(Self { config, supervisor })
    }
}
