//! Per-conversation LLM message history.
//!
//! History is independent of which key served each turn; the router swaps
//! keys mid-conversation transparently. Records are append-only and owned by
//! the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default conversation time-to-live: 24 hours.
pub const DEFAULT_TTL_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl ChatRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One turn in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    pub token_estimate: u32,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(role: ChatRole, content: impl Into<String>) -> Self {
        let content = content.into();
        Self {
            token_estimate: estimate_tokens(&content),
            role,
            content,
            timestamp: Utc::now(),
        }
    }
}

/// Conversation-level bookkeeping updated on every append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationMetadata {
    pub message_count: usize,
    pub total_tokens: u64,
    /// Model that served the most recent assistant turn
    pub last_model: Option<String>,
}

/// The full record for one conversation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub conversation_id: String,
    pub messages: Vec<ChatMessage>,
    pub metadata: ConversationMetadata,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

impl ConversationRecord {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            conversation_id: conversation_id.into(),
            messages: Vec::new(),
            metadata: ConversationMetadata::default(),
            created_at: now,
            last_activity: now,
        }
    }

    /// Append a message, updating metadata. `model` is recorded only for
    /// assistant turns.
    pub fn append(&mut self, message: ChatMessage, model: Option<&str>) {
        self.metadata.message_count += 1;
        self.metadata.total_tokens += u64::from(message.token_estimate);
        if message.role == ChatRole::Assistant {
            if let Some(model) = model {
                self.metadata.last_model = Some(model.to_string());
            }
        }
        self.last_activity = Utc::now();
        self.messages.push(message);
    }

    /// Overwrite the estimate on the most recent message with the actual
    /// provider-reported token count.
    pub fn correct_last_token_count(&mut self, actual_tokens: u32) {
        if let Some(last) = self.messages.last_mut() {
            let old = u64::from(last.token_estimate);
            self.metadata.total_tokens = self.metadata.total_tokens - old + u64::from(actual_tokens);
            last.token_estimate = actual_tokens;
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>, ttl_seconds: u64) -> bool {
        let age = now.signed_duration_since(self.last_activity);
        age.num_seconds() >= 0 && age.num_seconds() as u64 >= ttl_seconds
    }
}

/// Cheap token estimate: characters / 4, minimum 1 for non-empty text.
pub fn estimate_tokens(text: &str) -> u32 {
    if text.is_empty() {
        return 0;
    }
    ((text.chars().count() + 3) / 4) as u32
}
