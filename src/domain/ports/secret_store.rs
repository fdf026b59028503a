//! Abstract read-only secret lookup (port interface).
//!
//! Secrets are never owned by this system; every access is a fresh read.

use async_trait::async_trait;
use thiserror::Error;

/// A secret value. Debug/Display never reveal the material.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Expose the raw material. Call sites should pass it straight to the
    /// provider client and drop it.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[redacted]")
    }
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found for key id: {0}")]
    NotFound(String),

    #[error("Secret backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Port interface for key_id → secret lookup.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn fetch(&self, key_id: &str) -> Result<Secret, SecretError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_never_prints_material() {
        let secret = Secret::new("sk-live-abc123");
        assert_eq!(format!("{secret}"), "[redacted]");
        assert!(!format!("{secret:?}").contains("abc123"));
        assert_eq!(secret.expose(), "sk-live-abc123");
    }
}
