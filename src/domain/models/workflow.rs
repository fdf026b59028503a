//! Runtime workflow state.
//!
//! `WorkflowState` is exclusively owned by the Orchestrator; other components
//! observe it via the bus or read-only snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use super::event::FailureReport;
use super::todo::TaskStatus;

/// Runtime state for a single task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub status: TaskStatus,
    /// How many times this task has been dispatched. Retries of failed work
    /// happen as new tasks, so this only exceeds 1 on bus redelivery.
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Classified failure payload from the tester, when one exists. This is
    /// what the debugger receives through the branch protocol.
    pub failure: Option<FailureReport>,
    /// References into the artifact store produced by this task.
    pub artifact_refs: Vec<String>,
}

impl TaskState {
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Pending,
            attempts: 0,
            last_error: None,
            failure: None,
            artifact_refs: Vec::new(),
        }
    }
}

/// Runtime state for one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    /// Path of the persisted TodoList this state was created from.
    pub todo_list_ref: String,
    /// Threads through every event this workflow produces.
    pub correlation_id: Uuid,
    pub tasks: HashMap<String, TaskState>,
    pub iteration: u32,
    pub max_iterations: u32,
    pub created_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        todo_list_ref: impl Into<String>,
        max_iterations: u32,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            todo_list_ref: todo_list_ref.into(),
            correlation_id: Uuid::new_v4(),
            tasks: HashMap::new(),
            iteration: 0,
            max_iterations,
            created_at: Utc::now(),
        }
    }

    /// All tasks are in a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.tasks.values().all(|t| t.status.is_terminal())
    }

    /// All tasks completed successfully.
    pub fn all_completed(&self) -> bool {
        !self.tasks.is_empty()
            && self.tasks.values().all(|t| t.status == TaskStatus::Completed)
    }

    /// Ids of tasks currently in `Failed` state.
    pub fn failed_task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .map(|t| t.task_id.clone())
            .collect();
        ids.sort();
        ids
    }
}

/// Terminal outcome of a workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkflowOutcome {
    /// All tasks completed; artifact refs attached per task.
    Success,
    /// Iteration cap (or wall clock) reached with failures remaining.
    FailedAfterIterations { iterations: u32 },
    /// Fatal error before/while running (invalid input, infrastructure down).
    Aborted { reason: String },
}

/// Final report emitted when a workflow terminates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowReport {
    pub workflow_id: String,
    pub outcome: WorkflowOutcome,
    pub iterations_run: u32,
    /// Last error per task chain, keyed by task id.
    pub last_errors: HashMap<String, String>,
    /// Artifact refs per completed task.
    pub artifacts: HashMap<String, Vec<String>>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowReport {
    pub fn from_state(state: &WorkflowState, outcome: WorkflowOutcome) -> Self {
        let mut last_errors = HashMap::new();
        let mut artifacts = HashMap::new();
        for task in state.tasks.values() {
            if let Some(err) = &task.last_error {
                last_errors.insert(task.task_id.clone(), err.clone());
            }
            if !task.artifact_refs.is_empty() {
                artifacts.insert(task.task_id.clone(), task.artifact_refs.clone());
            }
        }
        Self {
            workflow_id: state.workflow_id.clone(),
            outcome,
            iterations_run: state.iteration,
            last_errors,
            artifacts,
            finished_at: Utc::now(),
        }
    }
}
