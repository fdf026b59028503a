//! Filesystem artifact store.
//!
//! Layout: `<root>/<workflow_id>/<task_id>/<attempt_id>/<name>`. Writes are
//! content-addressed (truncated sha256 recorded in the ref) and write-once:
//! an existing `(workflow, task, attempt, name)` path is never overwritten,
//! so prior attempts stay available for replay.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::ports::artifact_store::ArtifactError;
use crate::domain::ports::{ArtifactRef, ArtifactStore};

pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, workflow_id: &str, task_id: &str, attempt_id: u32, name: &str) -> PathBuf {
        self.root
            .join(workflow_id)
            .join(task_id)
            .join(attempt_id.to_string())
            .join(name)
    }

    fn digest(content: &[u8]) -> String {
        let hash = Sha256::digest(content);
        let hex: String = hash.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        workflow_id: &str,
        task_id: &str,
        attempt_id: u32,
        name: &str,
        content: &[u8],
    ) -> Result<ArtifactRef, ArtifactError> {
        let path = self.path_of(workflow_id, task_id, attempt_id, name);
        if tokio::fs::try_exists(&path).await? {
            return Err(ArtifactError::AlreadyExists(path.display().to_string()));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        let artifact = ArtifactRef {
            workflow_id: workflow_id.to_string(),
            task_id: task_id.to_string(),
            attempt_id,
            name: name.to_string(),
            digest: Self::digest(content),
        };
        debug!(uri = %artifact.to_uri(), digest = %artifact.digest, bytes = content.len(), "artifact stored");
        Ok(artifact)
    }

    async fn get(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_of(
            &artifact.workflow_id,
            &artifact.task_id,
            artifact.attempt_id,
            &artifact.name,
        );
        tokio::fs::read(&path)
            .await
            .map_err(|_| ArtifactError::NotFound(artifact.to_uri()))
    }

    async fn list(&self, workflow_id: &str) -> Result<Vec<ArtifactRef>, ArtifactError> {
        let workflow_dir = self.root.join(workflow_id);
        if !tokio::fs::try_exists(&workflow_dir).await? {
            return Ok(Vec::new());
        }

        let mut artifacts = Vec::new();
        let mut task_entries = tokio::fs::read_dir(&workflow_dir).await?;
        while let Some(task_entry) = task_entries.next_entry().await? {
            let task_id = entry_name(task_entry.path().as_path());
            let mut attempt_entries = tokio::fs::read_dir(task_entry.path()).await?;
            while let Some(attempt_entry) = attempt_entries.next_entry().await? {
                let Ok(attempt_id) = entry_name(attempt_entry.path().as_path()).parse::<u32>()
                else {
                    continue;
                };
                let mut files = tokio::fs::read_dir(attempt_entry.path()).await?;
                while let Some(file) = files.next_entry().await? {
                    let content = tokio::fs::read(file.path()).await?;
                    artifacts.push(ArtifactRef {
                        workflow_id: workflow_id.to_string(),
                        task_id: task_id.clone(),
                        attempt_id,
                        name: entry_name(file.path().as_path()),
                        digest: Self::digest(&content),
                    });
                }
            }
        }
        artifacts.sort_by(|a, b| {
            a.task_id
                .cmp(&b.task_id)
                .then(a.attempt_id.cmp(&b.attempt_id))
                .then(a.name.cmp(&b.name))
        });
        Ok(artifacts)
    }
}

fn entry_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
