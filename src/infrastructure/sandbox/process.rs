//! Subprocess sandbox runner.
//!
//! Invokes the configured runner command as an isolated child process:
//! cleared environment, dedicated output directory, wall-clock timeout with
//! kill. Network denial, memory/CPU caps, non-root execution and the
//! ephemeral root filesystem are enforced by the runner image around this
//! process boundary; this adapter owns the process lifecycle and output
//! capture.
//!
//! Exit code 0 means the run completed cleanly irrespective of test
//! pass/fail; results travel through the report artifacts.

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};

use crate::domain::models::config::SandboxConfig;
use crate::domain::ports::{Sandbox, SandboxError, SandboxOutcome, SandboxRequest};

pub struct ProcessSandbox {
    config: SandboxConfig,
}

impl ProcessSandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, request: SandboxRequest) -> Result<SandboxOutcome, SandboxError> {
        tokio::fs::create_dir_all(&request.output_dir).await?;

        let mut parts = self.config.runner_command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| SandboxError::Spawn("empty runner command".to_string()))?;

        let mut command = Command::new(program);
        command
            .args(parts)
            .arg("--input")
            .arg(&request.input_dir)
            .arg("--output")
            .arg(&request.output_dir)
            .arg("--seed")
            .arg(request.rng_seed.to_string())
            .arg("--timeout")
            .arg(request.timeout_seconds.to_string())
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("SANDBOX_MEMORY_MB", self.config.memory_mb.to_string())
            .env("SANDBOX_CPU_SECONDS", self.config.cpu_seconds.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(
            runner = %self.config.runner_command,
            input = %request.input_dir.display(),
            output = %request.output_dir.display(),
            seed = request.rng_seed,
            "starting sandbox run"
        );

        let started = Instant::now();
        let child = command
            .spawn()
            .map_err(|e| SandboxError::Spawn(format!("{program}: {e}")))?;

        let wall_clock = Duration::from_secs(request.timeout_seconds);
        let output = match timeout(wall_clock, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // kill_on_drop reaps the child when the future is dropped
                warn!(
                    timeout_seconds = request.timeout_seconds,
                    "sandbox run exceeded wall clock, killed"
                );
                return Err(SandboxError::Timeout {
                    timeout_seconds: request.timeout_seconds,
                });
            }
        };

        Ok(SandboxOutcome {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_seconds: started.elapsed().as_secs_f64(),
            artifacts_dir: request.output_dir,
        })
    }
}
