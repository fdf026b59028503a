//! Role-specialized agents.
//!
//! Agents are stateless workers: each consumes dispatch events from its role
//! channel, does its work (all LLM calls through the router), and publishes
//! a result event. Handlers are idempotent keyed by
//! `(correlation_id, task_id, event_type)` so bus redelivery is safe.

pub mod architect;
pub mod coder;
pub mod debugger;
pub mod planner;
pub mod tester;

pub use architect::ArchitectAgent;
pub use coder::CoderAgent;
pub use debugger::DebuggerAgent;
pub use planner::PlannerAgent;
pub use tester::TesterAgent;

use async_trait::async_trait;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::models::{
    channels, AgentRole, Event, EventType, FailureReport, TodoItem,
};
use crate::domain::ports::{ArtifactStore, MessageBus, Sandbox};
use crate::services::llm_router::LlmRouter;
use crate::services::orchestrator::channel_for_role;

/// Shared services handed to every agent.
pub struct AgentServices {
    pub router: Arc<LlmRouter>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub sandbox: Arc<dyn Sandbox>,
    pub bus: Arc<dyn MessageBus>,
}

/// Per-task execution context.
pub struct AgentContext<'a> {
    pub services: &'a AgentServices,
    pub workflow_id: String,
    pub correlation_id: Uuid,
    pub attempt: u32,
}

impl AgentContext<'_> {
    /// Conversation id for this agent instance within the workflow.
    pub fn conversation_id(&self, role: AgentRole) -> String {
        format!("{}:{}", self.workflow_id, role)
    }
}

/// Successful agent result.
#[derive(Debug, Clone, Default)]
pub struct AgentOutput {
    pub artifact_refs: Vec<String>,
    pub data: serde_json::Value,
}

/// Terminal agent failure, optionally with a classified report for the
/// debugger.
#[derive(Debug, Clone)]
pub struct AgentFailure {
    pub error: String,
    pub failure: Option<FailureReport>,
}

impl AgentFailure {
    pub fn from_error(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            failure: None,
        }
    }

    pub fn classified(error: impl Into<String>, failure: FailureReport) -> Self {
        Self {
            error: error.into(),
            failure: Some(failure),
        }
    }
}

/// One role-specialized agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn handle(
        &self,
        task: &TodoItem,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, AgentFailure>;
}

/// Run an agent as a bus worker. The subscription is established before
/// this returns, so dispatches published afterwards cannot be missed. The
/// worker consumes its role channel until the bus closes, filtering
/// dispatches by role and deduplicating redeliveries.
pub async fn spawn_worker(
    services: Arc<AgentServices>,
    agent: Arc<dyn Agent>,
) -> Result<tokio::task::JoinHandle<()>, crate::domain::ports::BusError> {
    let channel = channel_for_role(agent.role());
    let mut subscription = services.bus.subscribe(channel).await?;

    Ok(tokio::spawn(async move {
        let mut seen: HashSet<(Uuid, Option<String>, EventType)> = HashSet::new();

        loop {
            let event = match subscription.recv().await {
                Ok(event) => event,
                Err(crate::domain::ports::BusError::Lagged { skipped }) => {
                    warn!(channel, skipped, "agent worker lagged; continuing");
                    continue;
                }
                Err(_) => return,
            };
            if event.event_type != EventType::TaskDispatch {
                continue;
            }
            let Ok(task) = serde_json::from_value::<TodoItem>(event.data.clone()) else {
                warn!(channel, event_id = %event.event_id, "undecodable dispatch payload");
                continue;
            };
            if task.agent_role != agent.role() {
                continue;
            }
            if !seen.insert(event.idempotency_key()) {
                info!(
                    correlation_id = %event.correlation_id,
                    task_id = %task.id,
                    "duplicate delivery ignored"
                );
                continue;
            }

            handle_dispatch(&services, agent.as_ref(), &event, task).await;
        }
    }))
}

async fn handle_dispatch(
    services: &AgentServices,
    agent: &dyn Agent,
    event: &Event,
    task: TodoItem,
) {
    // Workflow-id propagation invariant: the id comes from task metadata,
    // never from a local default. Missing means a hard failure.
    let Some(workflow_id) = task.workflow_id().map(String::from) else {
        error!(
            correlation_id = %event.correlation_id,
            task_id = %task.id,
            "dispatch without workflow_id in task metadata"
        );
        publish_result(
            services,
            event,
            &task,
            agent.role(),
            Err(AgentFailure::from_error("task metadata missing workflow_id")),
        )
        .await;
        return;
    };

    let ctx = AgentContext {
        services,
        workflow_id,
        correlation_id: event.correlation_id,
        attempt: 1,
    };

    info!(
        workflow_id = %ctx.workflow_id,
        correlation_id = %ctx.correlation_id,
        task_id = %task.id,
        agent_role = %agent.role(),
        "agent handling task"
    );

    let result = agent.handle(&task, &ctx).await;
    publish_result(services, event, &task, agent.role(), result).await;
}

async fn publish_result(
    services: &AgentServices,
    dispatch: &Event,
    task: &TodoItem,
    role: AgentRole,
    result: Result<AgentOutput, AgentFailure>,
) {
    let (event_type, data) = match result {
        Ok(output) => {
            let mut data = output.data;
            if !data.is_object() {
                data = json!({});
            }
            data["artifact_refs"] = json!(output.artifact_refs);
            (EventType::TaskCompleted, data)
        }
        Err(failure) => (
            EventType::TaskFailed,
            json!({"error": failure.error, "failure": failure.failure}),
        ),
    };

    let result_event = Event::new(
        event_type,
        dispatch.correlation_id,
        &dispatch.workflow_id,
        role.as_str(),
        data,
    )
    .with_task_id(&task.id);

    if let Err(e) = services.bus.publish(channels::TASK_RESULTS, result_event).await {
        error!(
            correlation_id = %dispatch.correlation_id,
            task_id = %task.id,
            error = %e,
            "failed to publish task result"
        );
    }
}

/// Extract a JSON payload from an LLM response that may wrap it in a code
/// fence or surrounding prose.
pub fn extract_json_from_response(response: &str) -> String {
    let trimmed = response.trim();

    if trimmed.starts_with("```json") {
        if let Some(end) = trimmed.rfind("```") {
            if end > 7 {
                return trimmed[7..end].trim().to_string();
            }
        }
    }

    if trimmed.starts_with("```") {
        if let Some(end) = trimmed.rfind("```") {
            let start = if trimmed.starts_with("```\n") { 4 } else { 3 };
            if end > start {
                return trimmed[start..end].trim().to_string();
            }
        }
    }

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        return trimmed.to_string();
    }

    // JSON object or array embedded in text
    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if end > start {
                return trimmed[start..=end].to_string();
            }
        }
    }

    trimmed.to_string()
}

/// Extract the first fenced code block, or the whole response when no fence
/// is present.
pub fn extract_code_block(response: &str) -> String {
    let trimmed = response.trim();
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        // Skip a language tag on the fence line
        let body_start = after_fence.find('\n').map_or(0, |i| i + 1);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            return body[..end].trim_end().to_string();
        }
    }
    trimmed.to_string()
}
