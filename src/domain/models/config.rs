//! Application configuration model.
//!
//! Loaded by the figment-based loader in `infrastructure::config` with
//! hierarchical merging (defaults → project yaml → local yaml → env vars).

use serde::{Deserialize, Serialize};

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub logging: LogSettings,
    #[serde(default)]
    pub llm: LlmEndpointConfig,
}

/// Router behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterConfig {
    /// When false, the router runs single-key fallback: one key id
    /// (`default`) resolved through the secret store, no reservation.
    pub multi_key_enabled: bool,
    /// Model used in single-key mode and as the light tier default
    pub default_model: String,
    /// Workload tag of the light tier (first choice)
    pub light_tier: String,
    /// Workload tag of the heavy tier (safety-block escalation target)
    pub heavy_tier: String,
    /// Path to the key catalog JSON file
    pub key_catalog_path: String,
    /// Widen model matching to the family when no exact match exists
    pub model_family_fallback: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            multi_key_enabled: false,
            default_model: "flash".to_string(),
            light_tier: "light".to_string(),
            heavy_tier: "heavy".to_string(),
            key_catalog_path: ".algoswarm/keys.json".to_string(),
            model_family_fallback: true,
        }
    }
}

/// Retry/backoff behavior for provider calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Per-attempt wall clock for one provider call
    pub attempt_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_ms: 30_000,
            attempt_timeout_ms: 60_000,
        }
    }
}

/// Rate-limit backend and middleware token buckets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// KV endpoint for distributed reservation; absence ⇒ permissive mode
    /// with the in-process backend
    pub backend_url: Option<String>,
    /// Per-user request-per-minute default for the front middleware
    pub user_rpm_default: u32,
    /// Global request-per-minute ceiling
    pub global_rpm_max: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            backend_url: None,
            user_rpm_default: 60,
            global_rpm_max: 600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    pub ttl_seconds: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self { ttl_seconds: 86_400 }
    }
}

/// Secret store backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// One of: env, vault, aws, azure
    pub store_type: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            store_type: "env".to_string(),
        }
    }
}

/// Sandbox execution limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Command invoked to run a strategy bundle; receives input dir, output
    /// dir, seed and timeout as arguments
    pub runner_command: String,
    pub timeout_seconds: u64,
    pub memory_mb: u64,
    pub cpu_seconds: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runner_command: "algoswarm-sandbox".to_string(),
            timeout_seconds: 120,
            memory_mb: 512,
            cpu_seconds: 60,
        }
    }
}

/// Orchestrator and iterative-loop limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub max_iterations: u32,
    /// Wall-clock cap for one iterative run
    pub max_duration_seconds: u64,
    /// Per-task dispatch timeout
    pub task_timeout_seconds: u64,
    /// Directory where workflow TodoLists and reports are persisted
    pub state_dir: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            max_duration_seconds: 3_600,
            task_timeout_seconds: 600,
            state_dir: ".algoswarm/workflows".to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogSettings {
    /// trace, debug, info, warn, error
    pub level: String,
    /// json or pretty
    pub format: String,
    /// When set, logs also go to rotating files in this directory
    pub log_dir: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            log_dir: None,
        }
    }
}

/// Provider endpoint for the HTTP LLM client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmEndpointConfig {
    pub base_url: String,
    pub request_timeout_seconds: u64,
}

impl Default for LlmEndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8811".to_string(),
            request_timeout_seconds: 120,
        }
    }
}
