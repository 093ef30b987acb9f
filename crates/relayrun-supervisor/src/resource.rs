//! Execution environment lifecycle.
//!
//! A run acquires exactly one environment, either a freshly launched local
//! browser on a port handed out by the shared [`PortAllocator`] or a remote
//! one looked up by endpoint. Everything the run holds is released once,
//! through [`Teardown`].

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use relayrun_core::TaskId;
use relayrun_worker_sdk::{RunHistory, StepCallback, Worker, WorkerError, WorkerRun};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{ResourceError, SupervisorError};

/// Hands out debugging ports. Shared by all runs of a process; a port is
/// never handed out twice.
#[derive(Debug)]
pub struct PortAllocator {
    last: AtomicU32,
}

impl PortAllocator {
    /// The first allocated port is `base + 1`.
    pub fn new(base: u16) -> Self {
        Self {
            last: AtomicU32::new(u32::from(base)),
        }
    }

    pub fn allocate(&self) -> Result<u16, ResourceError> {
        let port = self.last.fetch_add(1, Ordering::SeqCst).saturating_add(1);
        u16::try_from(port).map_err(|_| ResourceError::PortsExhausted)
    }
}

/// A pre-provisioned remote environment: `<base_url>/<browser_id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub base_url: String,
    pub browser_id: String,
}

impl RemoteEndpoint {
    pub fn new(base_url: impl Into<String>, browser_id: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            browser_id: browser_id.into(),
        }
    }

    /// URL of the environment itself; `DELETE` releases it.
    pub fn environment_url(&self) -> String {
        format!("{}/{}", self.base_url, self.browser_id)
    }

    /// URL reporting the environment's debugger endpoint.
    pub fn version_url(&self) -> String {
        format!("{}/json/version", self.environment_url())
    }
}

/// Where a run's environment comes from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum EnvironmentTarget {
    #[default]
    Local,
    Remote(RemoteEndpoint),
}

impl fmt::Display for EnvironmentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("local"),
            Self::Remote(endpoint) => write!(f, "remote({})", endpoint.environment_url()),
        }
    }
}

/// An acquired execution environment.
#[async_trait]
pub trait EnvironmentHandle: Send + Sync {
    /// URL the worker connects to.
    fn cdp_url(&self) -> &str;

    /// Short description for logs.
    fn describe(&self) -> String;

    /// Close any connection the supervisor holds to the environment.
    async fn close_connection(&mut self) -> Result<(), ResourceError> {
        Ok(())
    }

    /// Give the environment back. Idempotent.
    async fn release(&mut self) -> Result<(), ResourceError>;
}

/// Acquires execution environments.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    async fn acquire_local(&self, port: u16) -> Result<Box<dyn EnvironmentHandle>, ResourceError>;

    async fn acquire_remote(
        &self,
        endpoint: &RemoteEndpoint,
    ) -> Result<Box<dyn EnvironmentHandle>, ResourceError>;
}

/// Port allocation plus the provider that turns ports and endpoints into
/// environments.
#[derive(Clone)]
pub struct ResourceLifecycle {
    allocator: Arc<PortAllocator>,
    provider: Arc<dyn ResourceProvider>,
}

impl ResourceLifecycle {
    pub fn new(allocator: Arc<PortAllocator>, provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            allocator,
            provider,
        }
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    /// Acquire the environment named by `target`.
    pub async fn acquire(
        &self,
        task_id: &TaskId,
        target: &EnvironmentTarget,
    ) -> Result<Box<dyn EnvironmentHandle>, SupervisorError> {
        let handle = match target {
            EnvironmentTarget::Local => {
                let port = self.allocator.allocate()?;
                info!(task_id = %task_id, port, "Launching local environment");
                self.provider.acquire_local(port).await?
            }
            EnvironmentTarget::Remote(endpoint) => {
                info!(task_id = %task_id, endpoint = %endpoint.environment_url(), "Resolving remote environment");
                self.provider.acquire_remote(endpoint).await?
            }
        };
        info!(task_id = %task_id, environment = %handle.describe(), "Environment acquired");
        Ok(handle)
    }
}

/// The worker of a run, executing as its own task.
pub struct WorkerUnit {
    worker: Arc<dyn Worker>,
    handle: Option<JoinHandle<Result<RunHistory, WorkerError>>>,
}

impl WorkerUnit {
    /// Start `worker` on `run`, reporting steps to `callback`.
    pub fn spawn(worker: Arc<dyn Worker>, run: WorkerRun, callback: Arc<dyn StepCallback>) -> Self {
        let task_worker = worker.clone();
        let handle = tokio::spawn(async move { task_worker.run(run, callback).await });
        Self {
            worker,
            handle: Some(handle),
        }
    }

    /// True once the worker has returned (or was already joined or cancelled).
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the worker's result. If the caller goes away while waiting,
    /// the unit stays in place for [`WorkerUnit::cancel`].
    pub async fn join(&mut self) -> Result<RunHistory, SupervisorError> {
        let Some(handle) = self.handle.as_mut() else {
            return Err(SupervisorError::WorkerExecution(
                "worker result already taken".to_string(),
            ));
        };
        let joined = handle.await;
        self.handle = None;

        match joined {
            Ok(result) => Ok(result?),
            Err(e) if e.is_cancelled() => Err(SupervisorError::WorkerExecution(
                "worker cancelled".to_string(),
            )),
            Err(e) => Err(SupervisorError::WorkerExecution(format!(
                "worker panicked: {}",
                e
            ))),
        }
    }

    /// Stop the worker if it is still active and wait for its task to end.
    /// Returns the worker's result if it finished on its own first, `None`
    /// if it was cancelled or already joined.
    pub async fn cancel(&mut self) -> Option<Result<RunHistory, WorkerError>> {
        let handle = self.handle.take()?;
        if !handle.is_finished() {
            self.worker.stop();
            handle.abort();
        }
        match handle.await {
            Ok(result) => Some(result),
            Err(e) if e.is_cancelled() => None,
            Err(e) => Some(Err(WorkerError::Execution(format!(
                "worker panicked: {}",
                e
            )))),
        }
    }
}

/// Everything a run has to give back when it ends.
pub struct Teardown {
    task_id: TaskId,
    worker: Option<WorkerUnit>,
    environment: Option<Box<dyn EnvironmentHandle>>,
}

impl Teardown {
    pub fn new(task_id: TaskId) -> Self {
        Self {
            task_id,
            worker: None,
            environment: None,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn set_environment(&mut self, environment: Box<dyn EnvironmentHandle>) {
        self.environment = Some(environment);
    }

    pub fn set_worker(&mut self, worker: WorkerUnit) {
        self.worker = Some(worker);
    }

    pub fn worker_mut(&mut self) -> Option<&mut WorkerUnit> {
        self.worker.as_mut()
    }

    /// Stop the worker if still active, close the environment connection
    /// and release the environment. Every step runs even if an earlier one
    /// failed; the first failure is returned.
    pub async fn run(mut self) -> Result<(), SupervisorError> {
        let mut first_error: Option<ResourceError> = None;

        if let Some(mut worker) = self.worker.take() {
            if worker.cancel().await.is_some() {
                debug!(task_id = %self.task_id, "Worker had already finished");
            }
        }

        if let Some(mut environment) = self.environment.take() {
            let description = environment.describe();
            if let Err(e) = environment.close_connection().await {
                warn!(task_id = %self.task_id, environment = %description, error = %e, "Failed to close environment connection");
                first_error.get_or_insert(e);
            }
            match environment.release().await {
                Ok(()) => info!(task_id = %self.task_id, environment = %description, "Environment released"),
                Err(e) => {
                    warn!(task_id = %self.task_id, environment = %description, error = %e, "Failed to release environment");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(SupervisorError::Cleanup(e.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use relayrun_worker_sdk::{AgentOutput, BrowserState, ExecutionPolicy, LlmConfig};

    struct FakeEnvironment {
        releases: Arc<AtomicUsize>,
        released: bool,
        fail_release: bool,
    }

    #[async_trait]
    impl EnvironmentHandle for FakeEnvironment {
        fn cdp_url(&self) -> &str {
            "http://127.0.0.1:9223"
        }

        fn describe(&self) -> String {
            "fake".to_string()
        }

        async fn release(&mut self) -> Result<(), ResourceError> {
            if self.released {
                return Ok(());
            }
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
            if self.fail_release {
                return Err(ResourceError::NotReady {
                    port: 9223,
                    reason: "gone".to_string(),
                });
            }
            Ok(())
        }
    }

    struct FakeProvider {
        releases: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResourceProvider for FakeProvider {
        async fn acquire_local(&self, port: u16) -> Result<Box<dyn EnvironmentHandle>, ResourceError> {
            assert!(port > 9222);
            Ok(Box::new(FakeEnvironment {
                releases: self.releases.clone(),
                released: false,
                fail_release: false,
            }))
        }

        async fn acquire_remote(
            &self,
            _endpoint: &RemoteEndpoint,
        ) -> Result<Box<dyn EnvironmentHandle>, ResourceError> {
            Err(ResourceError::UpstreamStatus {
                status: 404,
                body: "unknown browser".to_string(),
            })
        }
    }

    /// Never finishes on its own.
    #[derive(Default)]
    struct HangingWorker {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Worker for HangingWorker {
        async fn run(
            &self,
            _run: WorkerRun,
            _callback: Arc<dyn StepCallback>,
        ) -> Result<RunHistory, WorkerError> {
            std::future::pending().await
        }

        fn stop(&self) {
            self.stopped.store(true, Ordering::SeqCst);
        }
    }

    struct Ignore;

    #[async_trait]
    impl StepCallback for Ignore {
        async fn on_step(&self, _state: BrowserState, _output: AgentOutput, _step_index: u32) {}
    }

    fn worker_run() -> WorkerRun {
        WorkerRun {
            task_id: "t1".to_string(),
            query: "q".to_string(),
            cdp_url: "http://127.0.0.1:9223".to_string(),
            step_budget: 5,
            system_prompt: None,
            llm: LlmConfig::default(),
            policy: ExecutionPolicy::default(),
            extra_headers: Default::default(),
        }
    }

    #[test]
    fn test_ports_are_sequential_from_base() {
        let allocator = PortAllocator::new(9222);
        assert_eq!(allocator.allocate().unwrap(), 9223);
        assert_eq!(allocator.allocate().unwrap(), 9224);
    }

    #[test]
    fn test_port_space_exhaustion() {
        let allocator = PortAllocator::new(u16::MAX - 1);
        assert_eq!(allocator.allocate().unwrap(), u16::MAX);
        assert!(matches!(
            allocator.allocate(),
            Err(ResourceError::PortsExhausted)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_allocations_are_unique() {
        let allocator = Arc::new(PortAllocator::new(9222));
        let mut handles = Vec::new();
        for _ in 0..64 {
            let allocator = allocator.clone();
            handles.push(tokio::spawn(async move { allocator.allocate().unwrap() }));
        }
        let mut ports = HashSet::new();
        for handle in handles {
            assert!(ports.insert(handle.await.unwrap()));
        }
        assert_eq!(ports.len(), 64);
    }

    #[test]
    fn test_remote_endpoint_urls() {
        let endpoint = RemoteEndpoint::new("http://10.0.0.5:8001/v1/browsers/", "b-42");
        assert_eq!(endpoint.environment_url(), "http://10.0.0.5:8001/v1/browsers/b-42");
        assert_eq!(
            endpoint.version_url(),
            "http://10.0.0.5:8001/v1/browsers/b-42/json/version"
        );
    }

    #[tokio::test]
    async fn test_lifecycle_maps_upstream_status() {
        let lifecycle = ResourceLifecycle::new(
            Arc::new(PortAllocator::new(9222)),
            Arc::new(FakeProvider {
                releases: Arc::default(),
            }),
        );
        let task_id = TaskId::new("t1");

        let local = lifecycle.acquire(&task_id, &EnvironmentTarget::Local).await;
        assert!(local.is_ok());

        let remote = lifecycle
            .acquire(
                &task_id,
                &EnvironmentTarget::Remote(RemoteEndpoint::new("http://x", "id")),
            )
            .await;
        assert!(matches!(remote, Err(SupervisorError::UpstreamProtocol(_))));
    }

    #[tokio::test]
    async fn test_teardown_cancels_worker_and_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let worker = Arc::new(HangingWorker::default());

        let mut teardown = Teardown::new(TaskId::new("t1"));
        teardown.set_worker(WorkerUnit::spawn(worker.clone(), worker_run(), Arc::new(Ignore)));
        teardown.set_environment(Box::new(FakeEnvironment {
            releases: releases.clone(),
            released: false,
            fail_release: false,
        }));

        teardown.run().await.unwrap();
        assert!(worker.stopped.load(Ordering::SeqCst));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_teardown_reports_release_failure() {
        let mut teardown = Teardown::new(TaskId::new("t1"));
        teardown.set_environment(Box::new(FakeEnvironment {
            releases: Arc::default(),
            released: false,
            fail_release: true,
        }));
        assert!(matches!(
            teardown.run().await,
            Err(SupervisorError::Cleanup(_))
        ));
    }

    #[tokio::test]
    async fn test_cancel_after_join_is_noop() {
        struct Quick;

        #[async_trait]
        impl Worker for Quick {
            async fn run(
                &self,
                _run: WorkerRun,
                _callback: Arc<dyn StepCallback>,
            ) -> Result<RunHistory, WorkerError> {
                Ok(RunHistory::default())
            }

            fn stop(&self) {}
        }

        let mut unit = WorkerUnit::spawn(Arc::new(Quick), worker_run(), Arc::new(Ignore));
        assert!(unit.join().await.is_ok());
        assert!(unit.is_finished());
        assert!(unit.cancel().await.is_none());
    }
    #[tokio::test]
    async fn test_finished_worker_is_not_stopped() {
        #[derive(Default)]
        struct Quick {
            stopped: AtomicBool,
        }

        #[async_trait]
        impl Worker for Quick {
            async fn run(
                &self,
                _run: WorkerRun,
                _callback: Arc<dyn StepCallback>,
            ) -> Result<RunHistory, WorkerError> {
                Ok(RunHistory::default())
            }

            fn stop(&self) {
                self.stopped.store(true, Ordering::SeqCst);
            }
        }

        let worker = Arc::new(Quick::default());
        let mut teardown = Teardown::new(TaskId::new("t1"));
        teardown.set_worker(WorkerUnit::spawn(worker.clone(), worker_run(), Arc::new(Ignore)));
        while !teardown.worker_mut().map_or(true, |unit| unit.is_finished()) {
            tokio::task::yield_now().await;
        }

        teardown.run().await.unwrap();
        assert!(!worker.stopped.load(Ordering::SeqCst));
    }
}
