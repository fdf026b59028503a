//! TodoList domain model.
//!
//! The TodoList is the authoritative declarative description of work for one
//! workflow. Items form a DAG via their dependency lists. The persisted JSON
//! copy is the source of truth when disk and in-memory state disagree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Metadata key that carries the owning workflow id on every dispatched task.
pub const WORKFLOW_ID_KEY: &str = "workflow_id";

/// Metadata key recording the task a fix-task was created for.
pub const ORIGIN_TASK_KEY: &str = "origin_task";

/// Metadata key recording the failure category that produced a fix-task.
pub const FAILURE_KIND_KEY: &str = "failure_kind";

/// Role of the agent a task is dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Planner,
    Architect,
    Coder,
    Tester,
    Debugger,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Planner => "planner",
            Self::Architect => "architect",
            Self::Coder => "coder",
            Self::Tester => "tester",
            Self::Debugger => "debugger",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "planner" => Some(Self::Planner),
            "architect" => Some(Self::Architect),
            "coder" => Some(Self::Coder),
            "tester" => Some(Self::Tester),
            "debugger" => Some(Self::Debugger),
            _ => None,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a task in the execution pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is defined but has not been dispatched
    #[default]
    Pending,
    /// Task is currently being executed by an agent
    Running,
    /// Task completed successfully
    Completed,
    /// Task failed during execution
    Failed,
    /// Task was skipped because a dependency failed
    Skipped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" | "complete" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Valid transitions from this status.
    ///
    /// Failed tasks are never retried in place: a retry is a new task with a
    /// fresh id, so `Failed` has no outgoing edges.
    pub fn valid_transitions(&self) -> &'static [TaskStatus] {
        match self {
            Self::Pending => &[Self::Running, Self::Skipped],
            Self::Running => &[Self::Completed, Self::Failed],
            Self::Completed | Self::Failed | Self::Skipped => &[],
        }
    }

    pub fn can_transition_to(&self, new_status: Self) -> bool {
        self.valid_transitions().contains(&new_status)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in a workflow's TodoList.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Unique identifier within the workflow (e.g. "t1", "t_fix_a3f2")
    pub id: String,
    /// Human-readable title
    pub title: String,
    /// Detailed description/prompt for the agent
    pub description: String,
    /// Which agent executes this task
    pub agent_role: AgentRole,
    /// Ids of tasks that must complete before this one starts
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Lower runs earlier within a ready set
    #[serde(default)]
    pub priority: i32,
    /// Free-form metadata; always contains `workflow_id` once the workflow runs
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
    /// Current status
    #[serde(default)]
    pub status: TaskStatus,
}

impl TodoItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, agent_role: AgentRole) -> Self {
        let title = title.into();
        Self {
            id: id.into(),
            description: title.clone(),
            title,
            agent_role,
            dependencies: Vec::new(),
            priority: 0,
            metadata: BTreeMap::new(),
            status: TaskStatus::Pending,
        }
    }

    /// Set the description (builder).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Add a dependency (builder). Self-dependencies and duplicates are ignored.
    pub fn with_dependency(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if task_id != self.id && !self.dependencies.contains(&task_id) {
            self.dependencies.push(task_id);
        }
        self
    }

    /// Set priority (builder). Lower runs earlier.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Insert a metadata entry (builder).
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read the workflow id from metadata.
    ///
    /// A missing workflow id on a dispatched task is a hard error at the
    /// consuming site, never a silent fallback.
    pub fn workflow_id(&self) -> Option<&str> {
        self.metadata.get(WORKFLOW_ID_KEY).and_then(|v| v.as_str())
    }

    /// Stamp the workflow id into metadata. Done by the orchestrator before
    /// every dispatch.
    pub fn set_workflow_id(&mut self, workflow_id: &str) {
        self.metadata.insert(
            WORKFLOW_ID_KEY.to_string(),
            serde_json::Value::String(workflow_id.to_string()),
        );
    }

    /// Validate item-local invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id cannot be empty".to_string());
        }
        if self.title.trim().is_empty() {
            return Err(format!("task {}: title cannot be empty", self.id));
        }
        if self.dependencies.contains(&self.id) {
            return Err(format!("task {}: cannot depend on itself", self.id));
        }
        Ok(())
    }
}

/// The dependency-ordered, persisted list of tasks for one workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoList {
    pub workflow_id: String,
    pub created_at: DateTime<Utc>,
    pub items: Vec<TodoItem>,
}

impl TodoList {
    pub fn new(workflow_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            created_at: Utc::now(),
            items: Vec::new(),
        }
    }

    /// Append an item (builder).
    pub fn with_item(mut self, item: TodoItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn get(&self, id: &str) -> Option<&TodoItem> {
        self.items.iter().find(|i| i.id == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut TodoItem> {
        self.items.iter_mut().find(|i| i.id == id)
    }

    /// Validate list-local invariants: item validity, unique ids, and that
    /// every dependency refers to an item in the list. Cycle detection lives
    /// in the dependency resolver.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for item in &self.items {
            item.validate()?;
            if !seen.insert(item.id.as_str()) {
                return Err(format!("duplicate task id: {}", item.id));
            }
        }
        for item in &self.items {
            for dep in &item.dependencies {
                if !seen.contains(dep.as_str()) {
                    return Err(format!("task {}: unknown dependency {}", item.id, dep));
                }
            }
        }
        Ok(())
    }

    /// Serialize to canonical JSON: UTF-8, object keys sorted, stable across
    /// reloads. Going through `serde_json::Value` sorts keys because the
    /// default map representation is a BTreeMap.
    pub fn to_canonical_json(&self) -> Result<String, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        serde_json::to_string_pretty(&value)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Generate an opaque workflow id of the form `wf_<12hex>`.
pub fn generate_workflow_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("wf_{}", &uuid[..12])
}
