//! Debugger agent.
//!
//! Receives a failure payload (classification, combined traceback,
//! reproduction command), and returns fix-tasks: new TodoList items with
//! fresh ids targeting the coder (or architect for design-level failures).
//! The origin task and failure category are recorded in the fix-task
//! metadata.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use crate::domain::models::todo::{FAILURE_KIND_KEY, ORIGIN_TASK_KEY};
use crate::domain::models::{AgentRole, FailureKind, FailureReport, TodoItem};
use crate::services::iterative_loop::fix_task_id;
use crate::services::llm_router::SendChatRequest;

use super::{Agent, AgentContext, AgentFailure, AgentOutput};

const SYSTEM_PROMPT: &str = "You are a debugging agent. Given a failure \
report from a strategy test run, produce a short, specific instruction for \
the coder describing exactly what to fix. Respond with the instruction text \
only.";

/// Payload placed in the debugger task description by the iterative loop.
#[derive(Debug, Deserialize)]
struct DebugPayload {
    origin_task: String,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    failure: Option<FailureReport>,
}

pub struct DebuggerAgent {
    model_preference: String,
}

impl DebuggerAgent {
    pub fn new(model_preference: impl Into<String>) -> Self {
        Self {
            model_preference: model_preference.into(),
        }
    }

    /// Fix-tasks go to the coder except for design-level failures, which go
    /// back to the architect.
    fn fix_role(kind: Option<FailureKind>) -> AgentRole {
        match kind {
            Some(FailureKind::ArtifactSchema) => AgentRole::Architect,
            _ => AgentRole::Coder,
        }
    }

    /// Deterministic instruction used when no LLM suggestion is available
    /// (safety block or exhausted keys).
    fn template_instruction(payload: &DebugPayload) -> String {
        let kind = payload
            .failure
            .as_ref()
            .map_or("unknown", |f| f.kind.as_str());
        let detail = payload
            .failure
            .as_ref()
            .map(|f| f.traceback.as_str())
            .or(payload.error.as_deref())
            .unwrap_or("no captured output");
        format!(
            "Fix the {kind} failure in the strategy produced by task {}. \
Captured output:\n{detail}",
            payload.origin_task
        )
    }
}

#[async_trait]
impl Agent for DebuggerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Debugger
    }

    async fn handle(
        &self,
        task: &TodoItem,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, AgentFailure> {
        let payload: DebugPayload = serde_json::from_str(&task.description)
            .map_err(|e| AgentFailure::from_error(format!("bad debugger payload: {e}")))?;

        // Secret leaks get no automatic fix: surface to the operator.
        if payload
            .error
            .as_deref()
            .is_some_and(|e| e.contains("secret-like pattern"))
        {
            return Ok(AgentOutput {
                artifact_refs: Vec::new(),
                data: json!({"fix_tasks": [], "flagged": "secrets_leak"}),
            });
        }

        let prompt = format!(
            "Failure report for task {origin}:\nclassification: {kind}\nerror: {error}\ntraceback:\n{traceback}\nreproduce with: {command}",
            origin = payload.origin_task,
            kind = payload
                .failure
                .as_ref()
                .map_or("unclassified", |f| f.kind.as_str()),
            error = payload.error.as_deref().unwrap_or(""),
            traceback = payload
                .failure
                .as_ref()
                .map(|f| f.traceback.as_str())
                .unwrap_or(""),
            command = payload
                .failure
                .as_ref()
                .map(|f| f.command.as_str())
                .unwrap_or(""),
        );

        // Safety blocks and exhausted keys fall back to a template
        // instruction rather than failing the branch protocol.
        let instruction = match ctx
            .services
            .router
            .send_one_shot(SendChatRequest {
                conversation_id: ctx.conversation_id(self.role()),
                prompt,
                model_preference: self.model_preference.clone(),
                expected_completion_tokens: 512,
                max_output_tokens: 1_024,
                temperature: Some(0.2),
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                task_type: Some("debug".to_string()),
            })
            .await
        {
            Ok(outcome) => outcome.content,
            Err(e) => {
                warn!(
                    workflow_id = %ctx.workflow_id,
                    correlation_id = %ctx.correlation_id,
                    error = %e,
                    "debugger LLM unavailable; using template instruction"
                );
                Self::template_instruction(&payload)
            }
        };

        let kind = payload.failure.as_ref().map(|f| f.kind);
        let mut fix = TodoItem::new(
            fix_task_id(&payload.origin_task),
            format!("Fix {} failure from {}", Self::fix_role(kind), payload.origin_task),
            Self::fix_role(kind),
        )
        .with_description(instruction)
        .with_metadata(ORIGIN_TASK_KEY, json!(payload.origin_task));
        if let Some(kind) = kind {
            fix = fix.with_metadata(FAILURE_KIND_KEY, json!(kind.as_str()));
        }
        fix.set_workflow_id(&ctx.workflow_id);

        Ok(AgentOutput {
            artifact_refs: Vec::new(),
            data: json!({"fix_tasks": [fix]}),
        })
    }
}
