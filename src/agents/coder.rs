//! Coder agent: generates the strategy source from the design.

use async_trait::async_trait;
use serde_json::json;

use crate::domain::models::{AgentRole, TodoItem};
use crate::services::llm_router::SendChatRequest;

use super::{extract_code_block, Agent, AgentContext, AgentFailure, AgentOutput};

const SYSTEM_PROMPT: &str = "You are a strategy coder. Implement the \
requested trading strategy in the strategy DSL. Respond with a single \
fenced code block containing the complete strategy source; no prose \
outside the fence.";

pub struct CoderAgent {
    model_preference: String,
}

impl CoderAgent {
    pub fn new(model_preference: impl Into<String>) -> Self {
        Self {
            model_preference: model_preference.into(),
        }
    }
}

#[async_trait]
impl Agent for CoderAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Coder
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
                expected_completion_tokens: 2_048,
                max_output_tokens: 8_192,
                temperature: Some(0.2),
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                task_type: Some("codegen".to_string()),
            })
            .await
            .map_err(|e| AgentFailure::from_error(format!("coder LLM call failed: {e}")))?;

        let source = extract_code_block(&outcome.content);
        if source.trim().is_empty() {
            return Err(AgentFailure::from_error("coder produced empty source"));
        }

        // Artifact filename embeds the workflow id for traceability
        let name = format!("strategy_{}.dsl", ctx.workflow_id);
        let artifact = ctx
            .services
            .artifacts
            .put(
                &ctx.workflow_id,
                &task.id,
                ctx.attempt,
                &name,
                source.as_bytes(),
            )
            .await
            .map_err(|e| AgentFailure::from_error(format!("failed to store strategy: {e}")))?;

        Ok(AgentOutput {
            artifact_refs: vec![artifact.to_uri()],
            data: json!({"model": outcome.model, "strategy_artifact": artifact.to_uri()}),
        })
    }
}
