//! Isolated strategy execution (port interface).
//!
//! Contract: no network, capped memory and CPU, wall-clock timeout, non-root
//! execution, ephemeral root filesystem. Exit code 0 means clean completion
//! irrespective of test pass/fail; the report artifacts carry the results.

use async_trait::async_trait;
use std::path::PathBuf;

use super::errors::SandboxError;

/// Inputs for one sandbox run.
#[derive(Debug, Clone)]
pub struct SandboxRequest {
    /// Directory containing strategy source, tests, and fixtures
    pub input_dir: PathBuf,
    /// Directory the run writes its artifacts into
    pub output_dir: PathBuf,
    pub rng_seed: u64,
    pub timeout_seconds: u64,
}

/// Result of one sandbox run. Both stdout and stderr are surfaced so the
/// failure classifier sees stderr-only content such as encoding tracebacks.
#[derive(Debug, Clone)]
pub struct SandboxOutcome {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_seconds: f64,
    pub artifacts_dir: PathBuf,
}

impl SandboxOutcome {
    /// Combined stdout + stderr, in that order, for classification.
    pub fn combined_output(&self) -> String {
        let mut combined = String::with_capacity(self.stdout.len() + self.stderr.len() + 1);
        combined.push_str(&self.stdout);
        if !self.stderr.is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str(&self.stderr);
        }
        combined
    }
}

/// Port interface for the sandbox.
#[async_trait]
pub trait Sandbox: Send + Sync {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome, SandboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combined_output_includes_both_streams() {
        let outcome = SandboxOutcome {
            exit_code: 0,
            stdout: "[OK] Strategy initialized".to_string(),
            stderr: "UnicodeEncodeError: 'ascii' codec can't encode".to_string(),
            duration_seconds: 1.2,
            artifacts_dir: PathBuf::from("/tmp/out"),
        };
        let combined = outcome.combined_output();
        assert!(combined.contains("[OK] Strategy initialized"));
        assert!(combined.contains("UnicodeEncodeError"));
    }

    #[test]
    fn test_combined_output_empty_stderr() {
        let outcome = SandboxOutcome {
            exit_code: 0,
            stdout: "done\n".to_string(),
            stderr: String::new(),
            duration_seconds: 0.1,
            artifacts_dir: PathBuf::from("/tmp/out"),
        };
        assert_eq!(outcome.combined_output(), "done\n");
    }
}
