//! Workflow-scoped artifact storage (port interface).
//!
//! Content-addressed, write-once per `(workflow_id, task_id, attempt_id)`;
//! prior attempts are preserved for replay.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to one stored artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub workflow_id: String,
    pub task_id: String,
    pub attempt_id: u32,
    pub name: String,
    /// Truncated sha256 of the content
    pub digest: String,
}

impl ArtifactRef {
    /// Stable string form, used in logs and task state. Embeds the full
    /// workflow id for traceability.
    pub fn to_uri(&self) -> String {
        format!(
            "artifact://{}/{}/{}/{}",
            self.workflow_id, self.task_id, self.attempt_id, self.name
        )
    }
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact already exists (write-once): {0}")]
    AlreadyExists(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Port interface for the artifact store.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store one artifact. Fails if `(workflow_id, task_id, attempt_id,
    /// name)` was already written.
    async fn put(
        &self,
        workflow_id: &str,
        task_id: &str,
        attempt_id: u32,
        name: &str,
        content: &[u8],
    ) -> Result<ArtifactRef, ArtifactError>;

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError>;

    /// All artifacts stored for a workflow, across tasks and attempts.
    async fn list(&self, workflow_id: &str) -> Result<Vec<ArtifactRef>, ArtifactError>;
}
