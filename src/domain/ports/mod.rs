pub mod artifact_store;
pub mod errors;
pub mod llm_client;
pub mod message_bus;
pub mod rate_limit;
pub mod sandbox;
pub mod secret_store;

pub use artifact_store::{ArtifactError, ArtifactRef, ArtifactStore};
pub use errors::{BrokerError, RouterError, SandboxError, WorkflowError};
pub use llm_client::{
    ChatRequest, FinishReason, LlmClient, LlmClientError, ProviderResponse, SafetySettings,
    TokenUsage, WireMessage,
};
pub use message_bus::{BusError, BusSubscription, MessageBus};
pub use rate_limit::{RateLimitBackend, RateLimitError, ReservationOutcome};
pub use sandbox::{Sandbox, SandboxOutcome, SandboxRequest};
pub use secret_store::{Secret, SecretError, SecretStore};
