//! Bus event envelope and the failure taxonomy.
//!
//! Every cross-agent message is a typed envelope with an event-type
//! discriminator. The correlation id threads through every event of one
//! workflow end-to-end.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Named bus channels.
pub mod channels {
    pub const PLANNER_REQUESTS: &str = "PLANNER_REQUESTS";
    pub const AGENT_REQUESTS: &str = "AGENT_REQUESTS";
    pub const TESTER_REQUESTS: &str = "TESTER_REQUESTS";
    pub const DEBUGGER_REQUESTS: &str = "DEBUGGER_REQUESTS";
    pub const TEST_RESULTS: &str = "TEST_RESULTS";
    pub const TASK_RESULTS: &str = "TASK_RESULTS";
    pub const WORKFLOW_EVENTS: &str = "WORKFLOW_EVENTS";
}

/// Event type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskDispatch,
    TaskCompleted,
    TaskFailed,
    TestResult,
    FixTasksCreated,
    WorkflowStarted,
    WorkflowCompleted,
    WorkflowFailed,
    IterationStarted,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskDispatch => "task_dispatch",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::TestResult => "test_result",
            Self::FixTasksCreated => "fix_tasks_created",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowCompleted => "workflow_completed",
            Self::WorkflowFailed => "workflow_failed",
            Self::IterationStarted => "iteration_started",
        }
    }
}

/// Envelope carried on every bus channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub correlation_id: Uuid,
    pub workflow_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub source_agent: String,
    pub timestamp: DateTime<Utc>,
    /// Sequence number stamped by the bus at publish time, monotonically
    /// increasing per channel. Zero until published.
    #[serde(default)]
    pub sequence: u64,
    pub data: serde_json::Value,
}

impl Event {
    pub fn new(
        event_type: EventType,
        correlation_id: Uuid,
        workflow_id: impl Into<String>,
        source_agent: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type,
            correlation_id,
            workflow_id: workflow_id.into(),
            task_id: None,
            source_agent: source_agent.into(),
            timestamp: Utc::now(),
            sequence: 0,
            data,
        }
    }

    pub fn with_task_id(mut self, task_id: impl Into<String>) -> Self {
        self.task_id = Some(task_id.into());
        self
    }

    /// Idempotency key for at-least-once consumers.
    pub fn idempotency_key(&self) -> (Uuid, Option<String>, EventType) {
        (self.correlation_id, self.task_id.clone(), self.event_type)
    }
}

/// Failure classification used by the Tester → Debugger path.
///
/// Exactly five kinds; the Debugger keys its fix strategy off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One or more tests failed on assertions
    TestFailures,
    /// The strategy failed to load/compile/validate statically
    StaticFailures,
    /// Two seeded runs diverged
    NonDeterministic,
    /// Sandbox infrastructure failure (timeout kill, missing runtime)
    SandboxError,
    /// Required artifacts missing, empty, or schema-invalid
    ArtifactSchema,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TestFailures => "test_failures",
            Self::StaticFailures => "static_failures",
            Self::NonDeterministic => "non_deterministic",
            Self::SandboxError => "sandbox_error",
            Self::ArtifactSchema => "artifact_schema",
        }
    }
}

/// Payload attached to every failure event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    /// Names of failing tests/checks
    pub failing_names: Vec<String>,
    /// Captured traceback: stdout and stderr combined. Encoding errors often
    /// surface only on stderr, so classification must see both streams.
    pub traceback: String,
    /// Minimal fixture the failure reproduces with
    pub fixture: String,
    /// Reproducible command line
    pub command: String,
    pub correlation_id: Uuid,
}

impl FailureReport {
    pub fn new(kind: FailureKind, correlation_id: Uuid) -> Self {
        Self {
            kind,
            failing_names: Vec::new(),
            traceback: String::new(),
            fixture: String::new(),
            command: String::new(),
            correlation_id,
        }
    }
}
