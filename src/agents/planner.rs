//! Planner agent: decomposes a strategy request into a dependency-ordered
//! TodoList.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::domain::models::{AgentRole, TodoItem};
use crate::services::llm_router::SendChatRequest;

use super::{extract_json_from_response, Agent, AgentContext, AgentFailure, AgentOutput};

const SYSTEM_PROMPT: &str = "You are a planning agent for an automated \
trading-strategy build pipeline. Decompose the user's request into discrete \
tasks for the roles: architect, coder, tester. Respond with a JSON array of \
objects: {\"id\", \"title\", \"description\", \"agent_role\", \
\"dependencies\", \"priority\"}. Dependencies must form a DAG. Lower \
priority runs earlier.";

/// Task shape the planner model is asked to produce.
#[derive(Debug, Deserialize)]
struct PlannedTask {
    id: String,
    title: String,
    description: String,
    agent_role: String,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    priority: i32,
}

pub struct PlannerAgent {
    model_preference: String,
}

impl PlannerAgent {
    pub fn new(model_preference: impl Into<String>) -> Self {
        Self {
            model_preference: model_preference.into(),
        }
    }

    fn parse_plan(response: &str) -> Result<Vec<TodoItem>, String> {
        let json_str = extract_json_from_response(response);
        let planned: Vec<PlannedTask> = serde_json::from_str(&json_str)
            .map_err(|e| format!("planner response is not a task array: {e}"))?;

        let mut items = Vec::with_capacity(planned.len());
        for task in planned {
            let role = AgentRole::from_str(&task.agent_role)
                .ok_or_else(|| format!("unknown agent_role: {}", task.agent_role))?;
            let mut item = TodoItem::new(task.id, task.title, role)
                .with_description(task.description)
                .with_priority(task.priority);
            for dep in task.dependencies {
                item = item.with_dependency(dep);
            }
            items.push(item);
        }
        Ok(items)
    }
}

#[async_trait]
impl Agent for PlannerAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Planner
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
                max_output_tokens: 4_096,
                temperature: Some(0.3),
                system_prompt: Some(SYSTEM_PROMPT.to_string()),
                task_type: Some("plan".to_string()),
            })
            .await
            .map_err(|e| AgentFailure::from_error(format!("planner LLM call failed: {e}")))?;

        let items = Self::parse_plan(&outcome.content).map_err(AgentFailure::from_error)?;
        if items.is_empty() {
            return Err(AgentFailure::from_error("planner produced no tasks"));
        }

        Ok(AgentOutput {
            artifact_refs: Vec::new(),
            data: json!({"todo_items": items, "model": outcome.model}),
        })
    }
}
