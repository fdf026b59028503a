//! Environment-variable secret backend.
//!
//! Key `k1` resolves from `ALGOSWARM_KEY_K1` (key id uppercased, dashes
//! mapped to underscores). Every fetch is a fresh read; nothing is cached.

use async_trait::async_trait;

use crate::domain::ports::{Secret, SecretError, SecretStore};

const ENV_PREFIX: &str = "ALGOSWARM_KEY_";

#[derive(Debug, Default)]
pub struct EnvSecretStore;

impl EnvSecretStore {
    pub fn new() -> Self {
        Self
    }

    fn var_name(key_id: &str) -> String {
        format!(
            "{ENV_PREFIX}{}",
            key_id.to_uppercase().replace(['-', '.'], "_")
        )
    }
}

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn fetch(&self, key_id: &str) -> Result<Secret, SecretError> {
        let var = Self::var_name(key_id);
        match std::env::var(&var) {
            Ok(value) if !value.is_empty() => Ok(Secret::new(value)),
            _ => Err(SecretError::NotFound(key_id.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_name_mapping() {
        assert_eq!(EnvSecretStore::var_name("flash-1"), "ALGOSWARM_KEY_FLASH_1");
        assert_eq!(EnvSecretStore::var_name("k.2"), "ALGOSWARM_KEY_K_2");
    }

    #[tokio::test]
    async fn test_fetch_from_env() {
        temp_env::async_with_vars(
            [("ALGOSWARM_KEY_TEST_KEY", Some("shh-material"))],
            async {
                let store = EnvSecretStore::new();
                let secret = store.fetch("test-key").await.unwrap();
                assert_eq!(secret.expose(), "shh-material");
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_missing_key_errors() {
        let store = EnvSecretStore::new();
        let err = store.fetch("definitely-not-set").await.unwrap_err();
        assert!(matches!(err, SecretError::NotFound(_)));
    }
}
