//! The Executor Registry (spec §4.I): `Type`/`Submit`/`Status`/`Cancel`/`Logs`
//! plus the four stock executors a step's `hints.executor` can select —
//! Local, Container, Apptainer, and Worker.
//!
//! Local, Container, and Apptainer all run the task to completion inside
//! `submit` via the Execution Engine (spec §4.G), differing only in which
//! Runtime Adapter the Engine is forced to use; Worker instead marks the
//! task `Queued` in the [`Store`](crate::persistence::Store) and lets a
//! remote worker claim it through the Worker Protocol (spec §4.J).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use tokio::sync::Mutex;
use wfl_types::{ExecutorKind, RuntimeCapabilities, Task, TaskState, Tool, WflError};

use crate::engine::{EngineOutcome, ExecutionEngine, ExitOutcome, ResourceRequest, RuntimeChoice};
use crate::persistence::Store;
use crate::runtime::{CancellationSource, CancellationToken};

/// The contract a step's chosen backend implements (spec §4.I).
#[async_trait]
pub trait Executor: Send + Sync {
    fn kind(&self) -> ExecutorKind;

    /// Hands `task` to this backend. The Local/Container/Apptainer
    /// executors run synchronously to completion and leave `task.state`
    /// terminal (or `Queued`, if a retry is warranted) by the time this
    /// returns; the Worker executor returns as soon as the task is queued
    /// in the store, well before it actually runs.
    async fn submit(&self, task: &mut Task, tool: &Tool, namespaces: &IndexMap<String, String>, work_dir: &Path, resources: ResourceRequest) -> Result<String, WflError>;

    async fn status(&self, task: &Task) -> Result<TaskState, WflError>;

    /// Requests cancellation of an in-flight task. A no-op if the task has
    /// already reached a terminal state.
    async fn cancel(&self, task: &mut Task) -> Result<(), WflError>;

    /// Returns whatever stdout/stderr this backend captured for `task`, if
    /// any. Worker-executed tasks report `(None, None)` in this reference
    /// implementation: the protocol carries only `outputs` back from the
    /// worker, not raw stream captures (spec §4.J `TaskCompleteRequest`).
    async fn logs(&self, task: &Task) -> Result<(Option<String>, Option<String>), WflError>;
}

/// Local, Container, and Apptainer share this shape: submit runs the
/// Execution Engine synchronously with a fixed [`RuntimeChoice`], recording
/// per-task cancellation handles and log captures so `cancel`/`logs` can be
/// called by a different task than the one awaiting `submit` (the
/// Scheduler cancels siblings from its own driving loop, spec §4.H step 6).
pub struct BackendExecutor {
    kind: ExecutorKind,
    choice: RuntimeChoice,
    engine: ExecutionEngine,
    running: Mutex<HashMap<String, CancellationSource>>,
    logs: Mutex<HashMap<String, (Option<String>, Option<String>)>>,
}

impl BackendExecutor {
    pub fn local(suppress_container: bool) -> Self {
        Self::new(ExecutorKind::Local, RuntimeChoice::Auto, suppress_container)
    }

    pub fn container() -> Self {
        Self::new(ExecutorKind::Container, RuntimeChoice::Docker, false)
    }

    pub fn apptainer() -> Self {
        Self::new(ExecutorKind::Apptainer, RuntimeChoice::Apptainer, false)
    }

    fn new(kind: ExecutorKind, choice: RuntimeChoice, suppress_container: bool) -> Self {
        Self { kind, choice, engine: ExecutionEngine::new(suppress_container), running: Mutex::new(HashMap::new()), logs: Mutex::new(HashMap::new()) }
    }

    async fn take_token(&self, task_id: &str) -> CancellationToken {
        let (source, token) = CancellationSource::new();
        self.running.lock().await.insert(task_id.to_string(), source);
        token
    }

    async fn classify(&self, task: &mut Task, tool: &Tool, outcome: EngineOutcome) {
        task.exit_code = Some(outcome.exit_code);
        task.outputs = outcome.outputs;
        match outcome.outcome {
            ExitOutcome::Success => {
                let _ = task.transition(TaskState::Success);
            }
            ExitOutcome::PermanentFailure => {
                task.error = Some(format!("tool {} exited with permanent failure code {}", tool.id, outcome.exit_code));
                let _ = task.transition(TaskState::Failed);
            }
            ExitOutcome::RetryableFailure => {
                if task.has_retries_remaining() {
                    task.attempt += 1;
                    let _ = task.transition(TaskState::Queued);
                } else {
                    task.error = Some(format!("tool {} exited with retryable code {} and no retries remain", tool.id, outcome.exit_code));
                    let _ = task.transition(TaskState::Failed);
                }
            }
        }
    }
}

#[async_trait]
impl Executor for BackendExecutor {
    fn kind(&self) -> ExecutorKind {
        self.kind
    }

    async fn submit(&self, task: &mut Task, tool: &Tool, namespaces: &IndexMap<String, String>, work_dir: &Path, resources: ResourceRequest) -> Result<String, WflError> {
        let _ = task.transition(TaskState::Running);
        let token = self.take_token(&task.id).await;

        let result = self.engine.execute(tool, &task.inputs, work_dir, namespaces, resources, self.choice, token).await;
        self.running.lock().await.remove(&task.id);

        match result {
            Ok(outcome) => {
                self.logs.lock().await.insert(task.id.clone(), (outcome.stdout_capture.clone(), outcome.stderr_capture.clone()));
                self.classify(task, tool, outcome).await;
            }
            Err(phase_error) => {
                task.error = Some(phase_error.to_string());
                let retryable = phase_error.source.is_retryable();
                if retryable && task.has_retries_remaining() {
                    task.attempt += 1;
                    let _ = task.transition(TaskState::Queued);
                } else {
                    let _ = task.transition(TaskState::Failed);
                }
            }
        }

        Ok(task.id.clone())
    }

    async fn status(&self, task: &Task) -> Result<TaskState, WflError> {
        Ok(task.state)
    }

    async fn cancel(&self, task: &mut Task) -> Result<(), WflError> {
        if let Some(source) = self.running.lock().await.get(&task.id) {
            source.cancel();
        }
        if !task.state.is_terminal() {
            task.error = Some("cancelled".to_string());
            let _ = task.transition(TaskState::Failed);
        }
        Ok(())
    }

    async fn logs(&self, task: &Task) -> Result<(Option<String>, Option<String>), WflError> {
        Ok(self.logs.lock().await.get(&task.id).cloned().unwrap_or((None, None)))
    }
}

/// The Worker executor (spec §4.I, §4.J): hands a task off to whichever
/// remote worker next claims it through `checkout_task`, rather than
/// running it itself.
pub struct WorkerExecutor {
    store: Arc<dyn Store>,
}

impl WorkerExecutor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Executor for WorkerExecutor {
    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Worker
    }

    async fn submit(&self, task: &mut Task, _tool: &Tool, _namespaces: &IndexMap<String, String>, _work_dir: &Path, _resources: ResourceRequest) -> Result<String, WflError> {
        let _ = task.transition(TaskState::Queued);
        self.store.create_task(task.clone()).await.map_err(WflError::from)?;
        Ok(task.id.clone())
    }

    async fn status(&self, task: &Task) -> Result<TaskState, WflError> {
        let stored = self.store.get_task(&task.id).await.map_err(WflError::from)?;
        Ok(stored.map(|t| t.state).unwrap_or(task.state))
    }

    async fn cancel(&self, task: &mut Task) -> Result<(), WflError> {
        task.error = Some("cancelled by server".to_string());
        let _ = task.transition(TaskState::Failed);
        self.store.update_task(task.clone()).await.map_err(WflError::from)?;
        Ok(())
    }

    async fn logs(&self, _task: &Task) -> Result<(Option<String>, Option<String>), WflError> {
        Ok((None, None))
    }
}

/// Runtime-capability advertisement for the `Local` executor's host, used
/// when the Scheduler needs to decide whether a step can run in-process at
/// all (spec §4.H step 4, "no executor accepts the step's declared runtime
/// requirements").
pub fn host_capabilities(supports_docker: bool, supports_apptainer: bool, cores: u32, ram_mb: u64) -> RuntimeCapabilities {
    RuntimeCapabilities { supports_docker, supports_apptainer, gpu_count: 0, cores, ram_mb }
}

/// Picks an executor for a step from its declared hint, falling back to
/// `Local` when the step has none (spec §4.H step 4 "default to Local").
pub fn select_executor(hint: Option<ExecutorKind>, registry: &ExecutorRegistry) -> Arc<dyn Executor> {
    match hint.unwrap_or(ExecutorKind::Local) {
        ExecutorKind::Local => registry.local.clone(),
        ExecutorKind::Container => registry.container.clone(),
        ExecutorKind::Apptainer => registry.apptainer.clone(),
        ExecutorKind::Worker => registry.worker.clone(),
    }
}

/// Holds one instance of each stock executor so the Scheduler can dispatch
/// by [`ExecutorKind`] without constructing a fresh backend per step.
#[derive(Clone)]
pub struct ExecutorRegistry {
    pub local: Arc<dyn Executor>,
    pub container: Arc<dyn Executor>,
    pub apptainer: Arc<dyn Executor>,
    pub worker: Arc<dyn Executor>,
}

impl ExecutorRegistry {
    pub fn new(suppress_container: bool, store: Arc<dyn Store>) -> Self {
        Self {
            local: Arc::new(BackendExecutor::local(suppress_container)),
            container: Arc::new(BackendExecutor::container()),
            apptainer: Arc::new(BackendExecutor::apptainer()),
            worker: Arc::new(WorkerExecutor::new(store)),
        }
    }
}
