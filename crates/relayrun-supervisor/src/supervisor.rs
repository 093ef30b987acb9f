//! Drives one run from acquisition to its terminal event.
//!
//! The client-facing stream pulls the run forward: each poll advances the
//! phase machine until it has an event to hand out. Exactly one event with
//! `is_finish` set ends every stream, and the run's resources are released
//! on a tracked task the stream never waits for.

use std::sync::Arc;

use futures_util::stream::{self, BoxStream, StreamExt};
use relayrun_core::{RunPhase, SseData, TaskId};
use relayrun_worker_sdk::RunHistory;
use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::browser::BrowserProvider;
use crate::config::SupervisorConfig;
use crate::context::TaskContext;
use crate::error::SupervisorError;
use crate::finalize::final_result;
use crate::observer::StepObserver;
use crate::reconcile::FileChangeReconciler;
use crate::relay::{EventRelay, Pop, RelayMessage, RelayReceiver};
use crate::resource::{EnvironmentHandle, PortAllocator, ResourceLifecycle, Teardown, WorkerUnit};

/// Events of one run, terminal event last.
pub type RunStream = BoxStream<'static, SseData>;

/// Starts runs and tracks their cleanup.
pub struct TaskSupervisor {
    config: Arc<SupervisorConfig>,
    lifecycle: ResourceLifecycle,
    cleanup: TaskTracker,
}

impl TaskSupervisor {
    /// Supervisor acquiring real browsers as configured.
    pub fn new(config: SupervisorConfig) -> Self {
        let provider = Arc::new(BrowserProvider::from_config(&config));
        let allocator = Arc::new(PortAllocator::new(config.base_cdp_port));
        Self::with_lifecycle(config, ResourceLifecycle::new(allocator, provider))
    }

    pub fn with_lifecycle(config: SupervisorConfig, lifecycle: ResourceLifecycle) -> Self {
        Self {
            config: Arc::new(config),
            lifecycle,
            cleanup: TaskTracker::new(),
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Start a run. Nothing happens until the stream is polled.
    pub fn start(&self, ctx: TaskContext) -> RunStream {
        info!(task_id = %ctx.task_id, target = %ctx.target, step_budget = ctx.step_budget, "Starting run");
        let run = Run {
            guard: ReleaseGuard::new(ctx.task_id.clone(), self.cleanup.clone()),
            ctx: Arc::new(ctx),
            config: self.config.clone(),
            lifecycle: self.lifecycle.clone(),
            phase: RunPhase::Init,
            relay: None,
            history: None,
            producer_failed: false,
        };

        stream::unfold(run, |mut run| async move {
            let event = run.next_event().await?;
            Some((event, run))
        })
        .boxed()
    }

    /// Cleanups scheduled and not yet finished.
    pub fn pending_cleanups(&self) -> usize {
        self.cleanup.len()
    }

    /// Wait until every scheduled cleanup has finished.
    pub async fn wait_for_cleanup(&self) {
        self.cleanup.close();
        self.cleanup.wait().await;
        self.cleanup.reopen();
    }
}

/// State of one run, owned by its stream.
struct Run {
    ctx: Arc<TaskContext>,
    config: Arc<SupervisorConfig>,
    lifecycle: ResourceLifecycle,
    phase: RunPhase,
    relay: Option<RelayReceiver>,
    history: Option<RunHistory>,
    /// The failure sentinel came through the relay.
    producer_failed: bool,
    guard: ReleaseGuard,
}

impl Run {
    /// Advance until the next event, or `None` once closed.
    async fn next_event(&mut self) -> Option<SseData> {
        loop {
            match self.step().await {
                Ok(Some(event)) => return Some(event),
                Ok(None) if self.phase.is_terminal() => return None,
                Ok(None) => continue,
                Err(e) => return self.fail(e),
            }
        }
    }

    async fn step(&mut self) -> Result<Option<SseData>, SupervisorError> {
        match self.phase {
            RunPhase::Init => self.acquire().await,
            RunPhase::Running => self.drain().await,
            RunPhase::Draining => self.collect().await,
            RunPhase::Reconciling => self.reconcile().await,
            RunPhase::Finalizing => self.finish(),
            RunPhase::Closed => Ok(None),
            RunPhase::AcquiringResource | RunPhase::Failed => Err(SupervisorError::Streaming(
                format!("run resumed in phase {}", self.phase),
            )),
        }
    }

    async fn acquire(&mut self) -> Result<Option<SseData>, SupervisorError> {
        self.transition(RunPhase::AcquiringResource)?;

        let environment = self
            .lifecycle
            .acquire(&self.ctx.task_id, &self.ctx.target)
            .await?;
        self.launch(environment);
        self.transition(RunPhase::Running)?;
        Ok(None)
    }

    fn launch(&mut self, environment: Box<dyn EnvironmentHandle>) {
        let (tx, rx) = EventRelay::bounded(self.config.relay_capacity);
        let observer = Arc::new(StepObserver::new(
            self.ctx.task_id.clone(),
            tx,
            self.ctx.upload.clone(),
            self.config.locale,
        ));
        let run = self.ctx.worker_run(environment.cdp_url());

        let worker = WorkerUnit::spawn(self.ctx.worker.clone(), run, observer);
        self.guard.teardown.set_environment(environment);
        self.guard.teardown.set_worker(worker);
        self.relay = Some(rx);
    }

    async fn drain(&mut self) -> Result<Option<SseData>, SupervisorError> {
        let relay = self
            .relay
            .as_mut()
            .ok_or_else(|| SupervisorError::Streaming("relay missing".to_string()))?;

        loop {
            match relay.pop_timeout(self.config.poll_interval).await {
                Pop::Message(RelayMessage::Event(event)) => return Ok(Some(event)),
                Pop::Message(RelayMessage::Error) => {
                    warn!(task_id = %self.ctx.task_id, "Event producer failed, stopping drain");
                    self.producer_failed = true;
                    break;
                }
                Pop::TimedOut => {
                    let finished = self
                        .guard
                        .teardown
                        .worker_mut()
                        .map_or(true, |worker| worker.is_finished());
                    if finished {
                        break;
                    }
                }
                Pop::Closed => break,
            }
        }

        self.transition(RunPhase::Draining)?;
        Ok(None)
    }

    async fn collect(&mut self) -> Result<Option<SseData>, SupervisorError> {
        if !self.producer_failed {
            if let Some(relay) = self.relay.as_mut() {
                match relay.try_pop() {
                    Some(RelayMessage::Event(event)) => return Ok(Some(event)),
                    Some(RelayMessage::Error) => self.producer_failed = true,
                    None => {}
                }
            }
        }
        self.relay = None;

        let worker = self
            .guard
            .teardown
            .worker_mut()
            .ok_or_else(|| SupervisorError::WorkerExecution("no worker running".to_string()))?;

        if self.producer_failed {
            return Err(match worker.cancel().await {
                Some(Err(e)) => e.into(),
                _ => SupervisorError::Streaming("event producer failed".to_string()),
            });
        }

        let history = worker.join().await?;
        debug!(task_id = %self.ctx.task_id, steps = history.items.len(), "Worker finished");
        self.history = Some(history);
        self.transition(RunPhase::Reconciling)?;
        Ok(None)
    }

    async fn reconcile(&mut self) -> Result<Option<SseData>, SupervisorError> {
        self.transition(RunPhase::Finalizing)?;
        let Some(upload) = self.ctx.upload.clone() else {
            return Ok(None);
        };

        let info = match FileChangeReconciler::run(upload.as_ref(), self.ctx.started_at).await {
            Ok(info) => info,
            Err(e) => {
                warn!(task_id = %self.ctx.task_id, error = %e, "File reconciliation failed");
                return Ok(None);
            }
        };
        if info.is_empty() {
            debug!(task_id = %self.ctx.task_id, "No artifacts changed");
            return Ok(None);
        }

        match serde_json::to_string(&info) {
            Ok(content) => Ok(Some(
                SseData::file_change(&self.ctx.task_id, content)
                    .with_response_for_model(self.config.locale.files_changed(info.len())),
            )),
            Err(e) => {
                warn!(task_id = %self.ctx.task_id, error = %e, "Failed to encode file changes");
                Ok(None)
            }
        }
    }

    fn finish(&mut self) -> Result<Option<SseData>, SupervisorError> {
        let history = self.history.take().unwrap_or_default();
        let result = final_result(&history);
        self.transition(RunPhase::Closed)?;
        info!(task_id = %self.ctx.task_id, steps = history.items.len(), "Run completed");
        self.guard.schedule();
        Ok(Some(SseData::finished(&self.ctx.task_id, result)))
    }

    /// Turn an unhandled failure into the terminal error event.
    fn fail(&mut self, error: SupervisorError) -> Option<SseData> {
        if self.phase.is_terminal() {
            error!(task_id = %self.ctx.task_id, error = %error, "Failure after run closed");
            return None;
        }
        let path: &[RunPhase] = if error.is_acquisition() {
            error!(task_id = %self.ctx.task_id, error = %error, "Failed to acquire execution environment");
            &[RunPhase::Closed]
        } else {
            error!(task_id = %self.ctx.task_id, phase = %self.phase, error = %error, "Run failed");
            &[RunPhase::Failed, RunPhase::Closed]
        };

        for &next in path {
            if let Err(e) = self.transition(next) {
                warn!(task_id = %self.ctx.task_id, error = %e, "Forcing run closed");
                self.phase = RunPhase::Closed;
                break;
            }
        }
        self.relay = None;
        self.guard.schedule();
        Some(SseData::failed(&self.ctx.task_id, error.to_string()))
    }

    fn transition(&mut self, next: RunPhase) -> Result<(), SupervisorError> {
        let from = self.phase;
        self.phase.advance(next)?;
        debug!(task_id = %self.ctx.task_id, from = %from, to = %next, "Run phase changed");
        Ok(())
    }
}

/// Schedules the run's [`Teardown`] exactly once: when the run closes, or
/// when the stream is dropped before that.
struct ReleaseGuard {
    teardown: Teardown,
    tracker: TaskTracker,
    scheduled: bool,
}

impl ReleaseGuard {
    fn new(task_id: TaskId, tracker: TaskTracker) -> Self {
        Self {
            teardown: Teardown::new(task_id),
            tracker,
            scheduled: false,
        }
    }

    fn schedule(&mut self) {
        if self.scheduled {
            return;
        }
        self.scheduled = true;

        let task_id = self.teardown.task_id().clone();
        let teardown = std::mem::replace(&mut self.teardown, Teardown::new(task_id.clone()));
        let release = async move {
            match teardown.run().await {
                Ok(()) => info!(task_id = %task_id, "Run resources released"),
                Err(e) => error!(task_id = %task_id, error = %e, "Run cleanup failed"),
            }
        };

        match Handle::try_current() {
            Ok(handle) => {
                self.tracker.spawn_on(release, &handle);
            }
            Err(_) => {
                error!(task_id = %self.teardown.task_id(), "No runtime left to release run resources");
            }
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if !self.scheduled {
            warn!(task_id = %self.teardown.task_id(), "Stream dropped before its terminal event");
            self.schedule();
        }
    }
}
