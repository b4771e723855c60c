//! Persistence Contracts (spec §4.K, §6 "Persistent state"): the interfaces
//! the Scheduler and Worker Protocol consume, without specifying how a
//! deployment backs them. The spec treats the actual KV/relational store as
//! an external collaborator (spec §1 "DELIBERATELY OUT OF SCOPE") and asks
//! only that we specify the operations invoked against it — so this module
//! is a trait plus one in-memory reference implementation, not a database
//! driver. A real deployment would swap in a store backed by a relational
//! engine with JSON columns for the structured fields (spec §6), keeping the
//! same [`Store`] contract.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use wfl_types::{GraphDocument, InternalKind, RuntimeCapabilities, Task, TaskState, Worker};

/// A workflow submission: one run of a [`GraphDocument`] against a job file.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SubmissionState {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Submission {
    pub id: String,
    pub workflow_id: String,
    pub state: SubmissionState,
    #[serde(default)]
    pub error: Option<String>,
}

/// The store interface the Scheduler and Worker Protocol consume (spec §6
/// "Persistent state"): CRUD over workflows/submissions/tasks/workers, plus
/// the one serializable transaction the protocol needs — task checkout.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_workflow(&self, id: &str, document: GraphDocument) -> Result<(), InternalKind>;
    async fn get_workflow(&self, id: &str) -> Result<Option<GraphDocument>, InternalKind>;

    async fn create_submission(&self, submission: Submission) -> Result<(), InternalKind>;
    async fn get_submission(&self, id: &str) -> Result<Option<Submission>, InternalKind>;
    async fn update_submission_state(&self, id: &str, state: SubmissionState, error: Option<String>) -> Result<(), InternalKind>;

    async fn create_task(&self, task: Task) -> Result<(), InternalKind>;
    async fn get_task(&self, id: &str) -> Result<Option<Task>, InternalKind>;
    async fn update_task(&self, task: Task) -> Result<(), InternalKind>;
    async fn list_tasks_for_submission(&self, submission_id: &str) -> Result<Vec<Task>, InternalKind>;

    async fn register_worker(&self, worker: Worker) -> Result<(), InternalKind>;
    async fn get_worker(&self, id: &str) -> Result<Option<Worker>, InternalKind>;
    async fn touch_worker_heartbeat(&self, id: &str, timestamp: &str, capabilities: RuntimeCapabilities) -> Result<(), InternalKind>;
    async fn deregister_worker(&self, id: &str) -> Result<(), InternalKind>;

    /// Atomically selects the oldest `Queued` task whose `executor ==
    /// "worker"` and whose inputs are runtime-compatible with `capabilities`,
    /// transitions it to `Running`, stamps its external handle to
    /// `worker_id`, and records it as the worker's `current_task` (spec
    /// §4.J "Checkout semantics"). Returns `None` if nothing matches. This is
    /// the one operation spec §5 calls out as requiring a serializable
    /// transaction — the in-memory reference implementation serializes it
    /// behind a single write lock.
    async fn checkout_task(&self, worker_id: &str, capabilities: &RuntimeCapabilities) -> Result<Option<Task>, InternalKind>;
}

/// A worker may claim a queued task only if its advertised runtime can
/// satisfy whatever the task demands (spec §4.J "a worker with runtime
/// `none` cannot claim a task whose inputs declare a container image").
pub fn worker_can_claim(task: &Task, capabilities: &RuntimeCapabilities) -> bool {
    let needs_docker = task.inputs.values().any(value_declares_docker_image);
    if needs_docker && !capabilities.supports_docker && !capabilities.supports_apptainer {
        return false;
    }
    true
}

fn value_declares_docker_image(value: &wfl_types::Value) -> bool {
    matches!(value, wfl_types::Value::Mapping(map) if map.contains_key("dockerPull"))
}

/// Reference in-memory implementation. Holds one [`RwLock`] per table; the
/// whole store lives behind an [`Arc`] so the CLI's `serve` entry point and
/// the Scheduler can share a handle without a separate connection pool.
#[derive(Default)]
pub struct InMemoryStore {
    workflows: RwLock<HashMap<String, GraphDocument>>,
    submissions: RwLock<HashMap<String, Submission>>,
    tasks: RwLock<HashMap<String, Task>>,
    workers: RwLock<HashMap<String, Worker>>,
    /// Guards the checkout transaction so two concurrent workers can never
    /// be handed the same task (spec §5 "the worker-checkout operation is
    /// the single place requiring a serializable transaction").
    checkout_lock: tokio::sync::Mutex<()>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn put_workflow(&self, id: &str, document: GraphDocument) -> Result<(), InternalKind> {
        self.workflows.write().await.insert(id.to_string(), document);
        Ok(())
    }

    async fn get_workflow(&self, id: &str) -> Result<Option<GraphDocument>, InternalKind> {
        Ok(self.workflows.read().await.get(id).cloned())
    }

    async fn create_submission(&self, submission: Submission) -> Result<(), InternalKind> {
        self.submissions.write().await.insert(submission.id.clone(), submission);
        Ok(())
    }

    async fn get_submission(&self, id: &str) -> Result<Option<Submission>, InternalKind> {
        Ok(self.submissions.read().await.get(id).cloned())
    }

    async fn update_submission_state(&self, id: &str, state: SubmissionState, error: Option<String>) -> Result<(), InternalKind> {
        let mut submissions = self.submissions.write().await;
        let submission = submissions.get_mut(id).ok_or_else(|| InternalKind::InvariantViolated(format!("no such submission: {id}")))?;
        submission.state = state;
        submission.error = error;
        Ok(())
    }

    async fn create_task(&self, task: Task) -> Result<(), InternalKind> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, InternalKind> {
        Ok(self.tasks.read().await.get(id).cloned())
    }

    async fn update_task(&self, task: Task) -> Result<(), InternalKind> {
        self.tasks.write().await.insert(task.id.clone(), task);
        Ok(())
    }

    async fn list_tasks_for_submission(&self, submission_id: &str) -> Result<Vec<Task>, InternalKind> {
        Ok(self.tasks.read().await.values().filter(|t| t.workflow_submission_id == submission_id).cloned().collect())
    }

    async fn register_worker(&self, worker: Worker) -> Result<(), InternalKind> {
        self.workers.write().await.insert(worker.id.clone(), worker);
        Ok(())
    }

    async fn get_worker(&self, id: &str) -> Result<Option<Worker>, InternalKind> {
        Ok(self.workers.read().await.get(id).cloned())
    }

    async fn touch_worker_heartbeat(&self, id: &str, timestamp: &str, capabilities: RuntimeCapabilities) -> Result<(), InternalKind> {
        let mut workers = self.workers.write().await;
        let worker = workers.get_mut(id).ok_or_else(|| InternalKind::InvariantViolated(format!("no such worker: {id}")))?;
        worker.last_heartbeat = timestamp.to_string();
        worker.capabilities = capabilities;
        Ok(())
    }

    async fn deregister_worker(&self, id: &str) -> Result<(), InternalKind> {
        self.workers.write().await.remove(id);
        Ok(())
    }

    async fn checkout_task(&self, worker_id: &str, capabilities: &RuntimeCapabilities) -> Result<Option<Task>, InternalKind> {
        let _guard = self.checkout_lock.lock().await;

        let mut tasks = self.tasks.write().await;
        let candidate_id = tasks
            .values()
            .filter(|t| t.state == TaskState::Queued && t.executor == "worker" && worker_can_claim(t, capabilities))
            .min_by(|a, b| a.id.cmp(&b.id))
            .map(|t| t.id.clone());

        let Some(candidate_id) = candidate_id else {
            tracing::debug!(worker_id, "persistence: no queued task matches worker capabilities");
            return Ok(None);
        };
        let task = tasks.get_mut(&candidate_id).expect("candidate id came from this map");
        task.transition(TaskState::Running).map_err(InternalKind::InvariantViolated)?;
        task.external_handle = Some(worker_id.to_string());
        let assigned = task.clone();
        drop(tasks);

        let mut workers = self.workers.write().await;
        if let Some(worker) = workers.get_mut(worker_id) {
            worker.current_task = Some(assigned.id.clone());
        }

        tracing::info!(worker_id, task_id = %assigned.id, "persistence: checked out task to worker");
        Ok(Some(assigned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wfl_types::TaskState;

    #[tokio::test]
    async fn checkout_selects_oldest_queued_worker_task() {
        let store = InMemoryStore::new();
        let mut t1 = Task::new("task-b", "sub1", "b", "worker");
        t1.transition(TaskState::Scheduled).unwrap();
        t1.transition(TaskState::Queued).unwrap();
        let mut t2 = Task::new("task-a", "sub1", "a", "worker");
        t2.transition(TaskState::Scheduled).unwrap();
        t2.transition(TaskState::Queued).unwrap();
        store.create_task(t1).await.unwrap();
        store.create_task(t2).await.unwrap();
        store.register_worker(Worker { id: "w1".into(), name: "w1".into(), capabilities: RuntimeCapabilities::default(), current_task: None, last_heartbeat: "now".into() }).await.unwrap();

        let assigned = store.checkout_task("w1", &RuntimeCapabilities::default()).await.unwrap().unwrap();
        assert_eq!(assigned.id, "task-a");
        assert_eq!(assigned.state, TaskState::Running);

        let worker = store.get_worker("w1").await.unwrap().unwrap();
        assert_eq!(worker.current_task.as_deref(), Some("task-a"));
    }

    #[tokio::test]
    async fn checkout_returns_none_when_nothing_queued() {
        let store = InMemoryStore::new();
        assert!(store.checkout_task("w1", &RuntimeCapabilities::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn checkout_skips_tasks_requiring_docker_for_a_worker_without_it() {
        let store = InMemoryStore::new();
        let mut task = Task::new("needs-docker", "sub1", "step", "worker");
        task.transition(TaskState::Scheduled).unwrap();
        task.transition(TaskState::Queued).unwrap();
        let mut docker_ref = indexmap::IndexMap::new();
        docker_ref.insert("dockerPull".to_string(), wfl_types::Value::String("alpine:3".into()));
        task.inputs.insert("image_hint".into(), wfl_types::Value::Mapping(docker_ref));
        store.create_task(task).await.unwrap();
        store.register_worker(Worker { id: "w1".into(), name: "w1".into(), capabilities: RuntimeCapabilities::default(), current_task: None, last_heartbeat: "now".into() }).await.unwrap();

        assert!(store.checkout_task("w1", &RuntimeCapabilities::default()).await.unwrap().is_none());
    }
}
