//! In-memory conversation store.
//!
//! Append-only per-conversation history with a TTL sweep. Exclusively
//! mutated by the router; agents address conversations by id only. The
//! store never records which key served a turn — only the model name — so
//! key rotation stays invisible to conversation consumers.

use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::models::conversation::{ChatMessage, ChatRole, ConversationRecord};

pub struct ConversationStore {
    records: RwLock<HashMap<String, ConversationRecord>>,
    ttl_seconds: u64,
}

impl ConversationStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl_seconds,
        }
    }

    /// Append a user turn, creating the conversation if needed.
    pub async fn append_user(&self, conversation_id: &str, content: &str) {
        let mut records = self.records.write().await;
        let record = records
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationRecord::new(conversation_id));
        record.append(ChatMessage::new(ChatRole::User, content), None);
    }

    /// Append an assistant turn with the serving model, then overwrite the
    /// token estimate with the provider-reported count when available.
    pub async fn append_assistant(
        &self,
        conversation_id: &str,
        content: &str,
        model: &str,
        actual_tokens: Option<u32>,
    ) {
        let mut records = self.records.write().await;
        let record = records
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationRecord::new(conversation_id));
        record.append(ChatMessage::new(ChatRole::Assistant, content), Some(model));
        if let Some(tokens) = actual_tokens {
            record.correct_last_token_count(tokens);
        }
    }

    /// Full message history for a conversation, oldest first. Empty when the
    /// conversation does not exist.
    pub async fn history(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let records = self.records.read().await;
        records
            .get(conversation_id)
            .map(|r| r.messages.clone())
            .unwrap_or_default()
    }

    pub async fn get(&self, conversation_id: &str) -> Option<ConversationRecord> {
        self.records.read().await.get(conversation_id).cloned()
    }

    /// Drop conversations idle past the TTL. Returns how many were removed.
    pub async fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now, self.ttl_seconds));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "swept expired conversations");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
