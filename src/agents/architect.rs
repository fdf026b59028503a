//! Architect agent: produces the strategy design document.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::{AgentRole, TodoItem};
use crate::services::llm_router::SendChatRequest;

use super::{Agent, AgentContext, AgentFailure, AgentOutput};

const SYSTEM_PROMPT: &str = "You are a trading-strategy architect. Produce a \
concise design document for the requested strategy: entry and exit rules, \
risk parameters (stop loss, take profit, position sizing), and the \
indicators involved. Plain markdown, no code.";

pub struct ArchitectAgent {
    model_preference: String,
}

impl ArchitectAgent {
    pub fn new(model_preference: impl Into<String>) -> Self {
        Self {
            model_preference: model_preference.into(),
        }
    }
}

#[async_trait]
impl Agent for ArchitectAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Architect
    }

    async fn handle(
        &self,
        task: &TodoItem,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, AgentFailure> {
        let outcome = ctx
            .services
            .router
            .send_chat(SendChatRequest {
                conversation_id: ctx.conversation_id(self.role()),
                prompt: task.description.clone(),
                model_preference: self.model_preference.clone(),
                expected_completion_tokens: 1_024,
                max_output_tokens: 4_096,
                temperature: Some(0.4),
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                task_type: Some("design".to_string()),
            })
            .await
            .map_err(|e| AgentFailure::from_error(format!("architect LLM call failed: {e}")))?;

        // Artifact filename embeds the workflow id for traceability
        let name = format!("design_{}.md", ctx.workflow_id);
        let artifact = ctx
            .services
            .artifacts
            .put(
                &ctx.workflow_id,
                &task.id,
                ctx.attempt,
                &name,
                outcome.content.as_bytes(),
            )
            .await
            .map_err(|e| AgentFailure::from_error(format!("failed to store design: {e}")))?;

        Ok(AgentOutput {
            artifact_refs: vec![artifact.to_uri()],
            data: json!({"model": outcome.model}),
        })
    }
}
