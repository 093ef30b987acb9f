//! RelayRun Supervisor
//!
//! Owns the lifecycle of one browser-automation run: acquires an execution
//! environment, runs the worker concurrently, relays its classified steps
//! to the client through a bounded queue, reconciles the artifacts it
//! touched, emits exactly one terminal event and releases everything
//! exactly once without holding up the stream.

pub mod browser;
pub mod config;
pub mod context;
pub mod error;
pub mod finalize;
pub mod i18n;
pub mod observer;
pub mod reconcile;
pub mod relay;
pub mod resource;
pub mod supervisor;
pub mod upload;

pub use browser::BrowserProvider;
pub use config::SupervisorConfig;
pub use context::{TaskContext, DEFAULT_STEP_BUDGET, SANDBOX_TASK_HEADER};
pub use error::{ResourceError, SupervisorError, UploadError};
pub use i18n::Locale;
pub use observer::StepObserver;
pub use reconcile::FileChangeReconciler;
pub use relay::{EventRelay, Pop, RelayMessage, RelayReceiver, RelaySender};
pub use resource::{
    EnvironmentHandle, EnvironmentTarget, PortAllocator, RemoteEndpoint, ResourceLifecycle,
    ResourceProvider, Teardown, WorkerUnit,
};
pub use supervisor::{RunStream, TaskSupervisor};
pub use upload::{InMemoryUploadService, UploadService};
