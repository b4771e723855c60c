//! The Task record and its state machine (spec §3, "Task" lifecycle notes:
//! `Pending -> Scheduled -> Queued -> Running -> {Success, Failed}`).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A task's position in its lifecycle. Transitions are validated by
/// [`TaskState::can_transition_to`] — the Scheduler and worker HTTP handlers
/// both call through it rather than writing the state field directly, so
/// an invalid jump (e.g. `Pending` straight to `Running`) is a programmer
/// error caught at the call site instead of silently corrupting state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Scheduled,
    Queued,
    Running,
    Success,
    Failed,
}

impl TaskState {
    /// True if `self -> next` is a legal edge in the task lifecycle.
    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Pending, Scheduled)
                | (Scheduled, Queued)
                | (Queued, Running)
                | (Running, Success)
                | (Running, Failed)
                // A worker-executed task may be requeued after a retryable
                // failure without ever reaching a terminal state.
                | (Running, Queued)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failed)
    }
}

/// One step execution: the unit the Scheduler submits to an Executor and the
/// Worker Protocol hands out over `GET /workers/{id}/work`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub workflow_submission_id: String,
    pub step_id: String,
    /// Present when this task is one element of a scattered step.
    #[serde(default)]
    pub scatter_index: Option<usize>,
    pub state: TaskState,
    pub executor: String,
    #[serde(default)]
    pub inputs: IndexMap<String, Value>,
    #[serde(default)]
    pub outputs: IndexMap<String, Value>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub external_handle: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Step IDs this task's step declared as upstream dependencies, kept on
    /// the record for worker-side diagnostics even though the Scheduler
    /// itself drives ordering off the topological sort rather than this
    /// field.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_max_retries() -> u32 {
    0
}

impl Task {
    pub fn new(id: impl Into<String>, workflow_submission_id: impl Into<String>, step_id: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow_submission_id: workflow_submission_id.into(),
            step_id: step_id.into(),
            scatter_index: None,
            state: TaskState::Pending,
            executor: executor.into(),
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            exit_code: None,
            attempt: 0,
            max_retries: 0,
            external_handle: None,
            error: None,
            depends_on: Vec::new(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// True if another attempt should be made after a retryable failure
    /// (spec §4.H step 6: "if retries remain and the exit code is
    /// retryable, resubmit").
    pub fn has_retries_remaining(&self) -> bool {
        self.attempt < self.max_retries
    }

    /// Applies a validated transition, returning an error message if the
    /// edge is not legal from the current state.
    pub fn transition(&mut self, next: TaskState) -> Result<(), String> {
        if !self.state.can_transition_to(next) {
            return Err(format!("illegal task state transition: {:?} -> {:?}", self.state, next));
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_lifecycle_transitions_succeed_in_order() {
        let mut task = Task::new("t1", "sub1", "assemble", "local");
        assert!(task.transition(TaskState::Scheduled).is_ok());
        assert!(task.transition(TaskState::Queued).is_ok());
        assert!(task.transition(TaskState::Running).is_ok());
        assert!(task.transition(TaskState::Success).is_ok());
        assert!(task.state.is_terminal());
    }

    #[test]
    fn skipping_a_state_is_rejected() {
        let mut task = Task::new("t1", "sub1", "assemble", "local");
        assert!(task.transition(TaskState::Running).is_err());
        assert_eq!(task.state, TaskState::Pending);
    }

    #[test]
    fn running_task_can_be_requeued_after_retryable_failure() {
        let mut task = Task::new("t1", "sub1", "assemble", "worker");
        task.transition(TaskState::Scheduled).unwrap();
        task.transition(TaskState::Queued).unwrap();
        task.transition(TaskState::Running).unwrap();
        assert!(task.transition(TaskState::Queued).is_ok());
    }
}
