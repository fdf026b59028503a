//! Iterative workflow execution.
//!
//! Drives the orchestrator across multiple passes, converting failures into
//! fix-tasks through the debugger until every task completes or the
//! iteration budget (or wall clock) is exhausted. A failed task is never
//! retried in place — the debugger issues new tasks with fresh ids, so each
//! attempt's outcome is preserved.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{AgentRole, EventType, TodoItem, WorkflowOutcome, WorkflowReport};
use crate::domain::ports::WorkflowError;

use super::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct IterativeLoopConfig {
    pub max_iterations: u32,
    pub max_duration: Duration,
}

impl Default for IterativeLoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_duration: Duration::from_secs(3_600),
        }
    }
}

pub struct IterativeLoop {
    orchestrator: Arc<Orchestrator>,
    config: IterativeLoopConfig,
}

impl IterativeLoop {
    pub fn new(orchestrator: Arc<Orchestrator>, config: IterativeLoopConfig) -> Self {
        Self {
            orchestrator,
            config,
        }
    }

    /// Run a workflow iteratively until success or the caps are reached.
    ///
    /// Per iteration: execute one pass; on success report and stop; else
    /// hand every failed task to the debugger, append the returned
    /// fix-tasks to the persisted TodoList, and immediately reload — the
    /// reload is the synchronization step that surfaces the fix-tasks into
    /// the next pass.
    pub async fn run(&self, workflow_id: &str) -> Result<WorkflowReport, WorkflowError> {
        let deadline = Instant::now() + self.config.max_duration;

        for iteration in 1..=self.config.max_iterations {
            self.orchestrator.begin_iteration(workflow_id).await?;
            let state = self
                .orchestrator
                .workflow_state(workflow_id)
                .await
                .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
            self.orchestrator
                .publish_workflow_event(
                    &state,
                    EventType::IterationStarted,
                    json!({"iteration": iteration}),
                )
                .await?;
            info!(
                workflow_id,
                correlation_id = %state.correlation_id,
                iteration,
                "starting iteration"
            );

            self.orchestrator.execute_workflow(workflow_id).await?;

            let state = self
                .orchestrator
                .workflow_state(workflow_id)
                .await
                .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

            if state.all_completed() {
                info!(
                    workflow_id,
                    correlation_id = %state.correlation_id,
                    iteration,
                    "workflow completed"
                );
                let report = WorkflowReport::from_state(&state, WorkflowOutcome::Success);
                self.orchestrator
                    .publish_workflow_event(
                        &state,
                        EventType::WorkflowCompleted,
                        serde_json::to_value(&report)?,
                    )
                    .await?;
                return Ok(report);
            }

            if Instant::now() >= deadline {
                warn!(
                    workflow_id,
                    correlation_id = %state.correlation_id,
                    "wall clock exceeded, terminating"
                );
                break;
            }

            // Branch protocol: every failed task goes to the debugger, which
            // returns zero or more fix-tasks.
            let mut fix_tasks = Vec::new();
            for failed_id in state.failed_task_ids() {
                let task_state = state.tasks.get(&failed_id).expect("failed task exists");
                let debug_item = debugger_item(workflow_id, &failed_id, iteration);
                let payload = json!({
                    "origin_task": &failed_id,
                    "error": &task_state.last_error,
                    "failure": &task_state.failure,
                });

                let mut item = debug_item;
                item.description = payload.to_string();

                match self
                    .orchestrator
                    .dispatch_item(workflow_id, state.correlation_id, &item)
                    .await
                {
                    Ok(event) if event.event_type == EventType::TaskCompleted => {
                        if let Some(tasks) = event.data.get("fix_tasks") {
                            let parsed: Vec<TodoItem> =
                                serde_json::from_value(tasks.clone()).unwrap_or_default();
                            fix_tasks.extend(parsed);
                        }
                    }
                    Ok(_) | Err(_) => {
                        warn!(
                            workflow_id,
                            correlation_id = %state.correlation_id,
                            task_id = %failed_id,
                            "debugger produced no fix-tasks"
                        );
                    }
                }
            }

            if fix_tasks.is_empty() {
                warn!(
                    workflow_id,
                    correlation_id = %state.correlation_id,
                    iteration,
                    "no fix-tasks produced; stopping early"
                );
                break;
            }

            let fix_ids: Vec<String> = fix_tasks.iter().map(|t| t.id.clone()).collect();
            self.orchestrator
                .append_tasks(workflow_id, fix_tasks)
                .await?;
            // The critical synchronization step: without this reload the
            // next iteration would re-run the original task, not the fix.
            self.orchestrator.reload_workflow_tasks(workflow_id).await?;

            self.orchestrator
                .publish_workflow_event(
                    &state,
                    EventType::FixTasksCreated,
                    json!({"iteration": iteration, "fix_tasks": fix_ids}),
                )
                .await?;
        }

        let state = self
            .orchestrator
            .workflow_state(workflow_id)
            .await
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        let report = WorkflowReport::from_state(
            &state,
            WorkflowOutcome::FailedAfterIterations {
                iterations: state.iteration,
            },
        );
        self.orchestrator
            .publish_workflow_event(
                &state,
                EventType::WorkflowFailed,
                serde_json::to_value(&report)?,
            )
            .await?;
        Ok(report)
    }
}

/// Build the synthetic debugger invocation for one failed task.
fn debugger_item(workflow_id: &str, failed_id: &str, iteration: u32) -> TodoItem {
    let suffix = Uuid::new_v4().simple().to_string();
    let mut item = TodoItem::new(
        format!("debug_{failed_id}_i{iteration}_{}", &suffix[..6]),
        format!("Diagnose failure of {failed_id}"),
        AgentRole::Debugger,
    );
    item.set_workflow_id(workflow_id);
    item
}

/// Make a fix-task id for an origin task. Fresh ids keep every attempt's
/// outcome addressable.
pub fn fix_task_id(origin: &str) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("fix_{origin}_{}", &suffix[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fix_task_ids_are_fresh() {
        let a = fix_task_id("t_test");
        let b = fix_task_id("t_test");
        assert!(a.starts_with("fix_t_test_"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_debugger_item_carries_workflow_id() {
        let item = debugger_item("wf_abc", "t_test", 2);
        assert_eq!(item.workflow_id(), Some("wf_abc"));
        assert_eq!(item.agent_role, AgentRole::Debugger);
        assert!(item.id.starts_with("debug_t_test_i2_"));
    }
}
