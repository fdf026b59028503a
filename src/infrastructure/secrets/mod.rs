mod env;

pub use env::EnvSecretStore;

use std::sync::Arc;

use crate::domain::models::config::SecretsConfig;
use crate::domain::ports::SecretStore;
use crate::infrastructure::config::ConfigError;

/// Build the secret store selected by configuration. Only the env backend is
/// built in; vault/aws/azure are deployment adapters wired by the embedder.
pub fn build_secret_store(config: &SecretsConfig) -> Result<Arc<dyn SecretStore>, ConfigError> {
    match config.store_type.as_str() {
        "env" => Ok(Arc::new(EnvSecretStore::new())),
        other => Err(ConfigError::UnsupportedSecretBackend(other.to_string())),
    }
}
