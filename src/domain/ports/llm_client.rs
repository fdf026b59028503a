//! Abstract LLM provider client (port interface).
//!
//! The router is the only caller. Implementations handle the HTTP wire
//! format; retry, key selection and conversation bookkeeping live above this
//! seam in the router.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One message on the wire, already flattened from conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// "system" | "user" | "assistant"
    pub role: String,
    pub content: String,
}

/// Safety settings, re-applied explicitly on every call. Relying on
/// provider-side session inheritance has been observed to silently drop
/// these.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetySettings {
    #[serde(default)]
    pub block_threshold: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
}

/// Provider-agnostic chat request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<WireMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(default)]
    pub safety_settings: SafetySettings,
    pub max_output_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

/// Finish reasons the router must recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Ok,
    SafetyBlock,
    LengthCap,
    Error,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub content: String,
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// A safety block is detected both by the explicit finish reason and by
    /// a structurally empty response with no usable content.
    pub fn is_safety_blocked(&self) -> bool {
        self.finish_reason == FinishReason::SafetyBlock
            || (self.finish_reason == FinishReason::Ok && self.content.trim().is_empty())
    }
}

/// Transport-level client errors, classified for the retry loop.
#[derive(Debug, Clone, Error)]
pub enum LlmClientError {
    /// Provider 429
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// 502/503/504, timeout, connection reset
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// 4xx other than 429, malformed response after parse retries
    #[error("Non-retryable provider error: {0}")]
    NonRetryable(String),
}

impl LlmClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::Transient(_))
    }
}

/// Port interface for the model provider.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat request with the given API secret and return the parsed
    /// response. The full message list and safety settings are passed on
    /// every call; no provider-side session state is assumed.
    async fn chat(
        &self,
        request: ChatRequest,
        api_secret: &str,
    ) -> Result<ProviderResponse, LlmClientError>;
}
