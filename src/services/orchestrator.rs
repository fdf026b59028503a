//! Workflow orchestrator.
//!
//! Owns TodoList and WorkflowState for every registered workflow, dispatches
//! ready tasks to the agent channels, consumes results, and keeps in-memory
//! state synchronized with the persisted TodoList. TodoList mutations are
//! serialized per workflow: only the orchestrator (or the iterative loop
//! acting through it) touches the file.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::models::config::OrchestratorConfig;
use crate::domain::models::{
    channels, AgentRole, Event, EventType, FailureReport, TaskState, TaskStatus, TodoItem,
    TodoList, WorkflowState,
};
use crate::domain::ports::{MessageBus, WorkflowError};

use super::dependency_resolver::DependencyResolver;

/// Channel a role's dispatch events go to.
pub fn channel_for_role(role: AgentRole) -> &'static str {
    match role {
        AgentRole::Planner => channels::PLANNER_REQUESTS,
        AgentRole::Architect | AgentRole::Coder => channels::AGENT_REQUESTS,
        AgentRole::Tester => channels::TESTER_REQUESTS,
        AgentRole::Debugger => channels::DEBUGGER_REQUESTS,
    }
}

struct WorkflowEntry {
    todo: TodoList,
    state: WorkflowState,
}

pub struct Orchestrator {
    bus: Arc<dyn MessageBus>,
    resolver: DependencyResolver,
    config: OrchestratorConfig,
    workflows: Mutex<HashMap<String, WorkflowEntry>>,
}

impl Orchestrator {
    pub fn new(bus: Arc<dyn MessageBus>, config: OrchestratorConfig) -> Self {
        Self {
            bus,
            resolver: DependencyResolver::new(),
            config,
            workflows: Mutex::new(HashMap::new()),
        }
    }

    fn todo_path(&self, workflow_id: &str) -> PathBuf {
        PathBuf::from(&self.config.state_dir)
            .join(workflow_id)
            .join("todo.json")
    }

    /// Register a workflow: validates the DAG, initializes every task state
    /// to `pending`, and persists the canonical TodoList.
    pub async fn create_workflow(&self, todo: TodoList) -> Result<String, WorkflowError> {
        todo.validate().map_err(WorkflowError::InvalidTodoList)?;
        self.resolver.validate(&todo.items)?;

        let workflow_id = if todo.workflow_id.is_empty() {
            crate::domain::models::todo::generate_workflow_id()
        } else {
            todo.workflow_id.clone()
        };
        let mut todo = todo;
        todo.workflow_id.clone_from(&workflow_id);

        let path = self.todo_path(&workflow_id);
        persist_todo(&path, &todo).await?;

        let mut state = WorkflowState::new(
            workflow_id.clone(),
            path.display().to_string(),
            self.config.max_iterations,
        );
        for item in &todo.items {
            state.tasks.insert(item.id.clone(), TaskState::new(&item.id));
        }

        info!(
            workflow_id = %workflow_id,
            correlation_id = %state.correlation_id,
            tasks = todo.items.len(),
            "workflow created"
        );

        self.publish_workflow_event(&state, EventType::WorkflowStarted, serde_json::Value::Null)
            .await?;

        self.workflows
            .lock()
            .await
            .insert(workflow_id.clone(), WorkflowEntry { todo, state });
        Ok(workflow_id)
    }

    /// Run one pass: dispatch every `pending` task whose dependencies are
    /// all `completed`, in (priority, id) order, until nothing is ready.
    /// Tasks already `completed` are skipped — essential for iterative
    /// loops. Pending tasks behind a failed dependency are marked `skipped`.
    pub async fn execute_workflow(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        loop {
            // Snapshot under the lock; dispatch without holding it.
            let (next, correlation_id) = {
                let mut workflows = self.workflows.lock().await;
                let entry = workflows
                    .get_mut(workflow_id)
                    .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

                let statuses: HashMap<String, TaskStatus> = entry
                    .state
                    .tasks
                    .values()
                    .map(|t| (t.task_id.clone(), t.status))
                    .collect();

                // Tasks that can never run: a dependency failed or was skipped
                let blocked: Vec<String> = self
                    .resolver
                    .blocked_items(&entry.todo.items, &statuses)
                    .iter()
                    .map(|i| i.id.clone())
                    .collect();
                for id in &blocked {
                    if let Some(task) = entry.state.tasks.get_mut(id) {
                        task.status = TaskStatus::Skipped;
                    }
                    if let Some(item) = entry.todo.get_mut(id) {
                        item.status = TaskStatus::Skipped;
                    }
                    warn!(workflow_id, correlation_id = %entry.state.correlation_id, task_id = %id, "task skipped: failed dependency");
                }
                if !blocked.is_empty() {
                    // Re-evaluate: skipping may cascade
                    continue;
                }

                let statuses: HashMap<String, TaskStatus> = entry
                    .state
                    .tasks
                    .values()
                    .map(|t| (t.task_id.clone(), t.status))
                    .collect();
                let ready = self.resolver.ready_items(&entry.todo.items, &statuses);
                let Some(first) = ready.first() else {
                    persist_todo(&self.todo_path(workflow_id), &entry.todo).await?;
                    return Ok(());
                };

                let mut item = (*first).clone();
                // Workflow-id propagation invariant: stamped before dispatch
                item.set_workflow_id(workflow_id);
                if let Some(todo_item) = entry.todo.get_mut(&item.id) {
                    todo_item.set_workflow_id(workflow_id);
                    todo_item.status = TaskStatus::Running;
                }
                let task = entry
                    .state
                    .tasks
                    .get_mut(&item.id)
                    .expect("task state exists for todo item");
                task.status = TaskStatus::Running;
                task.attempts += 1;
                (item, entry.state.correlation_id)
            };

            let result = self.dispatch_item(workflow_id, correlation_id, &next).await;
            self.record_result(workflow_id, &next.id, result).await?;
        }
    }

    /// Dispatch one item on its role channel and wait for the matching
    /// result on `TASK_RESULTS`.
    pub(crate) async fn dispatch_item(
        &self,
        workflow_id: &str,
        correlation_id: Uuid,
        item: &TodoItem,
    ) -> Result<Event, WorkflowError> {
        if item.workflow_id().is_none() {
            return Err(WorkflowError::MissingWorkflowId {
                task_id: item.id.clone(),
            });
        }

        // Subscribe before publishing so the result cannot be missed.
        let mut results = self
            .bus
            .subscribe(channels::TASK_RESULTS)
            .await
            .map_err(|e| WorkflowError::Bus(e.to_string()))?;

        let dispatch = Event::new(
            EventType::TaskDispatch,
            correlation_id,
            workflow_id,
            "orchestrator",
            serde_json::to_value(item)?,
        )
        .with_task_id(&item.id);

        info!(
            workflow_id,
            correlation_id = %correlation_id,
            task_id = %item.id,
            agent_role = %item.agent_role,
            "dispatching task"
        );

        self.bus
            .publish(channel_for_role(item.agent_role), dispatch)
            .await
            .map_err(|e| WorkflowError::Bus(e.to_string()))?;

        let timeout = Duration::from_secs(self.config.task_timeout_seconds);
        let wait = async {
            loop {
                match results.recv().await {
                    Ok(event)
                        if event.task_id.as_deref() == Some(item.id.as_str())
                            && event.correlation_id == correlation_id
                            && matches!(
                                event.event_type,
                                EventType::TaskCompleted | EventType::TaskFailed
                            ) =>
                    {
                        return Ok(event);
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(WorkflowError::Bus(e.to_string())),
                }
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| WorkflowError::Dispatch {
                task_id: item.id.clone(),
                reason: format!("no result within {}s", self.config.task_timeout_seconds),
            })?
    }

    /// Fold a dispatch result into task state and the persisted TodoList.
    async fn record_result(
        &self,
        workflow_id: &str,
        task_id: &str,
        result: Result<Event, WorkflowError>,
    ) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.lock().await;
        let entry = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        let task = entry
            .state
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| WorkflowError::Dispatch {
                task_id: task_id.to_string(),
                reason: "unknown task".to_string(),
            })?;

        let new_status = match result {
            Ok(event) if event.event_type == EventType::TaskCompleted => {
                if let Some(refs) = event.data.get("artifact_refs").and_then(|v| v.as_array()) {
                    task.artifact_refs.extend(
                        refs.iter().filter_map(|v| v.as_str().map(String::from)),
                    );
                }
                task.last_error = None;
                TaskStatus::Completed
            }
            Ok(event) => {
                task.last_error = event
                    .data
                    .get("error")
                    .and_then(|v| v.as_str())
                    .map(String::from)
                    .or(Some("task failed".to_string()));
                task.failure = event
                    .data
                    .get("failure")
                    .cloned()
                    .and_then(|v| serde_json::from_value::<FailureReport>(v).ok());
                TaskStatus::Failed
            }
            Err(err) => {
                error!(
                    workflow_id,
                    correlation_id = %entry.state.correlation_id,
                    task_id,
                    error = %err,
                    "task dispatch failed"
                );
                task.last_error = Some(err.to_string());
                TaskStatus::Failed
            }
        };

        task.status = new_status;
        if let Some(item) = entry.todo.get_mut(task_id) {
            item.status = new_status;
        }
        persist_todo(&self.todo_path(workflow_id), &entry.todo).await?;
        Ok(())
    }

    /// Re-read the persisted TodoList and reconcile in-memory state.
    ///
    /// For each item in the new list: an existing `completed` task keeps
    /// that state; everything else is created or reset to `pending`. This is
    /// the sole sanctioned way to surface fix-tasks added externally.
    pub async fn reload_workflow_tasks(&self, workflow_id: &str) -> Result<(), WorkflowError> {
        let path = self.todo_path(workflow_id);
        let json = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| WorkflowError::Persistence(format!("{}: {e}", path.display())))?;
        let fresh = TodoList::from_json(&json)?;
        fresh.validate().map_err(WorkflowError::InvalidTodoList)?;
        self.resolver.validate(&fresh.items)?;

        let mut workflows = self.workflows.lock().await;
        let entry = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;

        let mut tasks = HashMap::with_capacity(fresh.items.len());
        let mut todo = fresh;
        for item in &mut todo.items {
            match entry.state.tasks.get(&item.id) {
                Some(existing) if existing.status == TaskStatus::Completed => {
                    item.status = TaskStatus::Completed;
                    tasks.insert(item.id.clone(), existing.clone());
                }
                Some(existing) if existing.status == TaskStatus::Failed => {
                    // Failed attempts keep their record; the fix is a new task
                    item.status = TaskStatus::Failed;
                    tasks.insert(item.id.clone(), existing.clone());
                }
                _ => {
                    item.status = TaskStatus::Pending;
                    tasks.insert(item.id.clone(), TaskState::new(&item.id));
                }
            }
        }

        info!(
            workflow_id,
            correlation_id = %entry.state.correlation_id,
            tasks = tasks.len(),
            "workflow tasks reloaded from disk"
        );
        entry.state.tasks = tasks;
        entry.todo = todo;
        Ok(())
    }

    /// Append fix-tasks to the persisted TodoList. The caller must follow
    /// with `reload_workflow_tasks`; the append/reload pair is the
    /// linearization point for surfacing new work.
    pub async fn append_tasks(
        &self,
        workflow_id: &str,
        items: Vec<TodoItem>,
    ) -> Result<(), WorkflowError> {
        let mut workflows = self.workflows.lock().await;
        let entry = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        for mut item in items {
            item.set_workflow_id(workflow_id);
            item.status = TaskStatus::Pending;
            entry.todo.items.push(item);
        }
        entry
            .todo
            .validate()
            .map_err(WorkflowError::InvalidTodoList)?;
        self.resolver.validate(&entry.todo.items)?;
        persist_todo(&self.todo_path(workflow_id), &entry.todo).await
    }

    /// Snapshot of a workflow's runtime state.
    pub async fn workflow_state(&self, workflow_id: &str) -> Option<WorkflowState> {
        self.workflows
            .lock()
            .await
            .get(workflow_id)
            .map(|entry| entry.state.clone())
    }

    /// Snapshot of a workflow's in-memory TodoList.
    pub async fn todo_list(&self, workflow_id: &str) -> Option<TodoList> {
        self.workflows
            .lock()
            .await
            .get(workflow_id)
            .map(|entry| entry.todo.clone())
    }

    /// Bump and return the iteration counter.
    pub(crate) async fn begin_iteration(&self, workflow_id: &str) -> Result<u32, WorkflowError> {
        let mut workflows = self.workflows.lock().await;
        let entry = workflows
            .get_mut(workflow_id)
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))?;
        entry.state.iteration += 1;
        Ok(entry.state.iteration)
    }

    pub(crate) async fn publish_workflow_event(
        &self,
        state: &WorkflowState,
        event_type: EventType,
        data: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        let event = Event::new(
            event_type,
            state.correlation_id,
            &state.workflow_id,
            "orchestrator",
            data,
        );
        self.bus
            .publish(channels::WORKFLOW_EVENTS, event)
            .await
            .map_err(|e| WorkflowError::Bus(e.to_string()))
    }
}

/// Write the canonical TodoList JSON, creating parent directories.
async fn persist_todo(path: &std::path::Path, todo: &TodoList) -> Result<(), WorkflowError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| WorkflowError::Persistence(e.to_string()))?;
    }
    let json = todo
        .to_canonical_json()
        .map_err(WorkflowError::Serialization)?;
    tokio::fs::write(path, json)
        .await
        .map_err(|e| WorkflowError::Persistence(e.to_string()))
}
