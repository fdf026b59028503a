//! The LLM router: single entry point for all model calls.
//!
//! Composes key selection, atomic rate-limit reservation, conversation
//! persistence, retry with exponential backoff across distinct keys, and
//! safety-block escalation to the heavy model tier. Agents only ever see a
//! success or an already-classified terminal error.
//!
//! Structured concurrency: at most one in-flight provider call per
//! `send_chat`, each bounded by a per-attempt deadline; backoff sleeps are
//! plain tokio sleeps, so dropping the future cancels cleanly.

use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::domain::models::config::{RetryConfig, RouterConfig};
use crate::domain::models::conversation::{estimate_tokens, ChatRole};
use crate::domain::ports::{
    ChatRequest, LlmClient, LlmClientError, RouterError, SafetySettings, TokenUsage, WireMessage,
};

use super::conversation_store::ConversationStore;
use super::key_manager::{KeyManager, SelectionRequest};

/// Inputs for one routed chat call.
#[derive(Debug, Clone)]
pub struct SendChatRequest {
    pub conversation_id: String,
    pub prompt: String,
    pub model_preference: String,
    /// Token estimate used for the TPM reservation
    pub expected_completion_tokens: u64,
    pub max_output_tokens: u32,
    pub temperature: Option<f32>,
    pub system_prompt: Option<String>,
    /// Free-form label carried into logs (e.g. "plan", "codegen")
    pub task_type: Option<String>,
}

/// Successful router result.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    pub content: String,
    /// Model that actually served the call (may differ from the preference
    /// after family fallback or tier escalation)
    pub model: String,
    pub key_id: String,
    pub tokens: TokenUsage,
}

/// Aggregated router health.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RouterHealth {
    pub usable_keys: usize,
    pub conversation_count: usize,
    pub ok: bool,
}

pub struct LlmRouter {
    key_manager: Arc<KeyManager>,
    conversations: Arc<ConversationStore>,
    client: Arc<dyn LlmClient>,
    retry: RetryConfig,
    config: RouterConfig,
    safety: SafetySettings,
}

impl LlmRouter {
    pub fn new(
        key_manager: Arc<KeyManager>,
        conversations: Arc<ConversationStore>,
        client: Arc<dyn LlmClient>,
        retry: RetryConfig,
        config: RouterConfig,
    ) -> Self {
        Self {
            key_manager,
            conversations,
            client,
            retry,
            config,
            safety: SafetySettings::default(),
        }
    }

    pub fn with_safety_settings(mut self, safety: SafetySettings) -> Self {
        self.safety = safety;
        self
    }

    /// Send a chat turn within a conversation.
    ///
    /// The user turn is appended first; history is reconstructed from the
    /// store and passed in full on every attempt, together with the system
    /// prompt and safety settings — provider-side session state is never
    /// relied on. The assistant turn is appended only on success.
    pub async fn send_chat(&self, request: SendChatRequest) -> Result<ChatOutcome, RouterError> {
        self.conversations
            .append_user(&request.conversation_id, &request.prompt)
            .await;

        let history = self.conversations.history(&request.conversation_id).await;
        let messages: Vec<WireMessage> = history
            .iter()
            .map(|m| WireMessage {
                role: m.role.as_str().to_string(),
                content: m.content.clone(),
            })
            .collect();

        let outcome = self.dispatch(&request, messages).await?;

        self.conversations
            .append_assistant(
                &request.conversation_id,
                &outcome.content,
                &outcome.model,
                Some(outcome.tokens.output_tokens),
            )
            .await;

        Ok(outcome)
    }

    /// One-shot call without conversation persistence.
    pub async fn send_one_shot(&self, request: SendChatRequest) -> Result<ChatOutcome, RouterError> {
        let messages = vec![WireMessage {
            role: ChatRole::User.as_str().to_string(),
            content: request.prompt.clone(),
        }];
        self.dispatch(&request, messages).await
    }

    /// Aggregate health across the key manager and conversation store.
    pub async fn health_check(&self) -> RouterHealth {
        let usable_keys = self.key_manager.usable_key_count().await;
        RouterHealth {
            usable_keys,
            conversation_count: self.conversations.len().await,
            ok: usable_keys > 0,
        }
    }

    /// The retry loop: up to `max_retries` attempts over distinct keys.
    async fn dispatch(
        &self,
        request: &SendChatRequest,
        messages: Vec<WireMessage>,
    ) -> Result<ChatOutcome, RouterError> {
        let mut excluded: HashSet<String> = HashSet::new();
        let mut escalated = false;
        let mut saw_rate_limit = false;
        let mut last_error = String::new();

        let expected_tokens = request
            .expected_completion_tokens
            .max(u64::from(estimate_tokens(&request.prompt)));

        for attempt in 0..self.retry.max_retries {
            let selection = SelectionRequest {
                model_preference: request.model_preference.clone(),
                workload_tag: escalated.then(|| self.config.heavy_tier.clone()),
                expected_completion_tokens: expected_tokens,
                excluded_keys: excluded.clone(),
            };

            let selected = self.key_manager.select_key(&selection).await?;

            debug!(
                attempt,
                key_id = %selected.key_id,
                model = %selected.model_name,
                task_type = request.task_type.as_deref().unwrap_or(""),
                "dispatching provider call"
            );

            let chat_request = ChatRequest {
                model: selected.model_name.clone(),
                messages: messages.clone(),
                system: request.system_prompt.clone(),
                safety_settings: self.safety.clone(),
                max_output_tokens: request.max_output_tokens,
                temperature: request.temperature,
            };

            let attempt_deadline = Duration::from_millis(self.retry.attempt_timeout_ms);
            let result = tokio::time::timeout(
                attempt_deadline,
                self.client.chat(chat_request, selected.secret.expose()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(LlmClientError::Transient(format!(
                    "attempt deadline of {}ms exceeded",
                    self.retry.attempt_timeout_ms
                )))
            });

            match result {
                Ok(response) if response.is_safety_blocked() => {
                    // Content issue, not a key issue: health stays untouched.
                    if escalated {
                        info!(key_id = %selected.key_id, "safety block on heavy tier, giving up");
                        return Err(RouterError::SafetyBlocked);
                    }
                    info!(
                        key_id = %selected.key_id,
                        heavy_tier = %self.config.heavy_tier,
                        "safety block, escalating workload tier"
                    );
                    escalated = true;
                }
                Ok(response) => {
                    self.key_manager.report_success(&selected.key_id).await;
                    let tokens = response.usage.unwrap_or(TokenUsage {
                        input_tokens: messages
                            .iter()
                            .map(|m| estimate_tokens(&m.content))
                            .sum(),
                        output_tokens: estimate_tokens(&response.content),
                    });
                    return Ok(ChatOutcome {
                        content: response.content,
                        model: selected.model_name,
                        key_id: selected.key_id,
                        tokens,
                    });
                }
                Err(LlmClientError::NonRetryable(reason)) => {
                    return Err(RouterError::NonRetryable(reason));
                }
                Err(err) => {
                    saw_rate_limit |= matches!(err, LlmClientError::RateLimited(_));
                    last_error = err.to_string();
                    self.key_manager
                        .report_error(&selected.key_id, &last_error)
                        .await;
                    excluded.insert(selected.key_id.clone());

                    let backoff = self.backoff_with_jitter(attempt);
                    warn!(
                        attempt,
                        key_id = %selected.key_id,
                        error = %last_error,
                        backoff_ms = backoff.as_millis() as u64,
                        "retryable provider error, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        if saw_rate_limit {
            Err(RouterError::AllKeysExhausted {
                model_preference: request.model_preference.clone(),
            })
        } else if escalated && last_error.is_empty() {
            // The retry budget ran out before the heavy tier was tried
            Err(RouterError::SafetyBlocked)
        } else {
            Err(RouterError::NonRetryable(format!(
                "retries exhausted after {} attempts: {last_error}",
                self.retry.max_retries
            )))
        }
    }

    /// `base * 2^attempt` capped, with ±25% jitter.
    fn backoff_with_jitter(&self, attempt: u32) -> Duration {
        let base = self
            .retry
            .base_backoff_ms
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(self.retry.max_backoff_ms);
        let jitter = rand::thread_rng().gen_range(0.75..=1.25);
        Duration::from_millis((base as f64 * jitter) as u64)
    }
}
