//! Error types shared across the service layer.

use thiserror::Error;

/// Workflow/orchestration errors.
///
/// `InvalidTodoList` and `CyclicDependency` are fatal for the workflow and
/// never retried; dispatch errors mark the task failed with a retryable
/// cause (a fix-task, not an in-place retry).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Invalid TodoList: {0}")]
    InvalidTodoList(String),

    #[error("Circular dependency detected: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Task {task_id} has no workflow_id in metadata")]
    MissingWorkflowId { task_id: String },

    #[error("Dispatch failed for task {task_id}: {reason}")]
    Dispatch { task_id: String, reason: String },

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("State persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Classified router failures surfaced to agents.
///
/// Transient and rate-limit errors are recovered inside the router; callers
/// only ever see these terminal classifications.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouterError {
    #[error("All keys exhausted for model preference {model_preference}")]
    AllKeysExhausted { model_preference: String },

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Safety blocked on all tiers")]
    SafetyBlocked,

    #[error("Non-retryable provider error: {0}")]
    NonRetryable(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Secret store error: {0}")]
    Secret(String),
}

impl RouterError {
    /// Wire name of the error type, as carried in failure payloads.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::AllKeysExhausted { .. } => "all_keys_exhausted",
            Self::RateLimited(_) => "rate_limited",
            Self::SafetyBlocked => "safety_blocked",
            Self::NonRetryable(_) | Self::ConversationNotFound(_) | Self::Secret(_) => {
                "non_retryable"
            }
        }
    }
}

/// Backtest engine errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BrokerError {
    #[error("Invalid order: {0}")]
    InvalidOrder(String),

    #[error("Insufficient free margin: required {required:.2}, free {free:.2}")]
    InsufficientMargin { required: f64, free: f64 },

    #[error("Unknown order id: {0}")]
    UnknownOrder(u64),

    #[error("Unknown position id: {0}")]
    UnknownPosition(u64),

    #[error("Order {0} is not pending")]
    NotPending(u64),

    #[error("Invalid bar: {0}")]
    InvalidBar(String),

    #[error("No market data seen yet")]
    NoMarketData,
}

/// Sandbox infrastructure errors (distinct from a strategy failing its tests).
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to spawn sandbox process: {0}")]
    Spawn(String),

    #[error("Sandbox killed after exceeding {timeout_seconds}s wall clock")]
    Timeout { timeout_seconds: u64 },

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}
