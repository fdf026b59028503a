//! Shared helpers for the integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use algoswarm::agents::{Agent, AgentContext, AgentFailure, AgentOutput, AgentServices};
use algoswarm::domain::models::api_key::{ApiKeyMetadata, KeyCatalog};
use algoswarm::domain::models::config::{RetryConfig, RouterConfig};
use algoswarm::domain::models::{AgentRole, TodoItem};
use algoswarm::domain::ports::{
    ChatRequest, FinishReason, LlmClient, LlmClientError, MessageBus, ProviderResponse, Sandbox,
    SandboxOutcome, SandboxRequest, Secret, SecretError, SecretStore, TokenUsage,
};
use algoswarm::domain::ports::errors::SandboxError;
use algoswarm::infrastructure::artifacts::FsArtifactStore;
use algoswarm::services::{ConversationStore, KeyManager, LlmRouter, RateLimiterService};

/// Secret store backed by a map; secrets are `secret-<key_id>` by default.
pub struct MapSecrets(pub HashMap<String, String>);

impl MapSecrets {
    pub fn for_keys(keys: &[ApiKeyMetadata]) -> Self {
        Self(
            keys.iter()
                .map(|k| (k.key_id.clone(), format!("secret-{}", k.key_id)))
                .collect(),
        )
    }
}

#[async_trait]
impl SecretStore for MapSecrets {
    async fn fetch(&self, key_id: &str) -> Result<Secret, SecretError> {
        self.0
            .get(key_id)
            .map(|s| Secret::new(s.clone()))
            .ok_or_else(|| SecretError::NotFound(key_id.to_string()))
    }
}

type ChatBehavior =
    Box<dyn Fn(&ChatRequest, &str) -> Result<ProviderResponse, LlmClientError> + Send + Sync>;

/// LLM client whose behavior is a test-supplied function of (request,
/// secret). Records every call.
pub struct ScriptedLlmClient {
    behavior: ChatBehavior,
    pub calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedLlmClient {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&ChatRequest, &str) -> Result<ProviderResponse, LlmClientError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            behavior: Box::new(behavior),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_log(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn chat(
        &self,
        request: ChatRequest,
        api_secret: &str,
    ) -> Result<ProviderResponse, LlmClientError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.model.clone(), api_secret.to_string()));
        (self.behavior)(&request, api_secret)
    }
}

pub fn ok_response(content: &str) -> ProviderResponse {
    ProviderResponse {
        content: content.to_string(),
        finish_reason: FinishReason::Ok,
        usage: Some(TokenUsage {
            input_tokens: 10,
            output_tokens: 20,
        }),
    }
}

pub fn safety_blocked_response() -> ProviderResponse {
    ProviderResponse {
        content: String::new(),
        finish_reason: FinishReason::SafetyBlock,
        usage: None,
    }
}

/// Fast retry settings for tests: tiny backoff, generous deadline.
pub fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        base_backoff_ms: 10,
        max_backoff_ms: 100,
        attempt_timeout_ms: 5_000,
    }
}

/// Build a router plus its key manager over scripted client and catalog.
pub fn router_with(
    keys: Vec<ApiKeyMetadata>,
    client: Arc<ScriptedLlmClient>,
    retry: RetryConfig,
) -> (Arc<LlmRouter>, Arc<KeyManager>, Arc<ConversationStore>) {
    let secrets = Arc::new(MapSecrets::for_keys(&keys));
    let key_manager = Arc::new(KeyManager::new(
        KeyCatalog {
            keys,
            fallback_order: None,
        },
        Arc::new(RateLimiterService::in_memory()),
        secrets,
        true,
    ));
    let conversations = Arc::new(ConversationStore::new(86_400));
    let router = Arc::new(LlmRouter::new(
        key_manager.clone(),
        conversations.clone(),
        client,
        retry,
        RouterConfig::default(),
    ));
    (router, key_manager, conversations)
}

type SandboxBehavior =
    Box<dyn Fn(&SandboxRequest) -> Result<SandboxOutcome, SandboxError> + Send + Sync>;

/// Sandbox whose behavior is supplied by the test.
pub struct FakeSandbox {
    behavior: SandboxBehavior,
}

impl FakeSandbox {
    pub fn new<F>(behavior: F) -> Self
    where
        F: Fn(&SandboxRequest) -> Result<SandboxOutcome, SandboxError> + Send + Sync + 'static,
    {
        Self {
            behavior: Box::new(behavior),
        }
    }

    /// Sandbox that exits cleanly without writing anything.
    pub fn silent_ok() -> Self {
        Self::new(|request| {
            Ok(SandboxOutcome {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
                duration_seconds: 0.01,
                artifacts_dir: request.output_dir.clone(),
            })
        })
    }
}

#[async_trait]
impl Sandbox for FakeSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome, SandboxError> {
        (self.behavior)(&request)
    }
}

type AgentBehavior =
    Box<dyn Fn(&TodoItem) -> Result<AgentOutput, AgentFailure> + Send + Sync>;

/// Agent with scripted behavior; records the workflow id it observed for
/// each handled task.
pub struct StubAgent {
    role: AgentRole,
    behavior: AgentBehavior,
    pub handled: Mutex<Vec<(String, Option<String>)>>,
}

impl StubAgent {
    pub fn new<F>(role: AgentRole, behavior: F) -> Self
    where
        F: Fn(&TodoItem) -> Result<AgentOutput, AgentFailure> + Send + Sync + 'static,
    {
        Self {
            role,
            behavior: Box::new(behavior),
            handled: Mutex::new(Vec::new()),
        }
    }

    pub fn always_completes(role: AgentRole) -> Self {
        Self::new(role, |_| Ok(AgentOutput::default()))
    }

    pub fn handled_tasks(&self) -> Vec<(String, Option<String>)> {
        self.handled.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for StubAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn handle(
        &self,
        task: &TodoItem,
        _ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, AgentFailure> {
        self.handled
            .lock()
            .unwrap()
            .push((task.id.clone(), task.workflow_id().map(String::from)));
        (self.behavior)(task)
    }
}

/// Minimal AgentServices for worker-based tests. The router is wired to a
/// client that always errors; stubs that never call the LLM are unaffected.
pub fn stub_services(bus: Arc<dyn MessageBus>, artifact_root: &Path) -> Arc<AgentServices> {
    let client = Arc::new(ScriptedLlmClient::new(|_, _| {
        Err(LlmClientError::NonRetryable("not wired in this test".to_string()))
    }));
    let (router, _, _) = router_with(Vec::new(), client, fast_retry(1));
    Arc::new(AgentServices {
        router,
        artifacts: Arc::new(FsArtifactStore::new(artifact_root)),
        sandbox: Arc::new(FakeSandbox::silent_ok()),
        bus,
    })
}
