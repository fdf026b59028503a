//! Tester agent.
//!
//! Runs the generated strategy in the sandbox, validates the required
//! artifacts against the report schema, scans for secret-like patterns, and
//! performs a two-run determinism check. Failures are classified into the
//! five-kind taxonomy and carry the combined stdout+stderr traceback —
//! stderr-only content such as encoding errors must reach the classifier.

use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::models::{
    channels, AgentRole, Event, EventType, FailureKind, FailureReport, TestReport, TodoItem,
};
use crate::domain::ports::{ArtifactRef, Sandbox, SandboxOutcome, SandboxRequest};
use crate::infrastructure::logging::SecretScanner;

use super::{Agent, AgentContext, AgentFailure, AgentOutput};

/// Artifacts every sandbox run must produce, non-empty.
const REQUIRED_ARTIFACTS: [&str; 4] = [
    "test_report.json",
    "trades.csv",
    "equity_curve.csv",
    "events.log",
];

/// Tolerance for the determinism comparison of net P&L across seeded runs.
const DETERMINISM_PNL_TOLERANCE: f64 = 1e-9;

pub struct TesterAgent {
    scanner: SecretScanner,
    default_timeout_seconds: u64,
    default_rng_seed: u64,
}

impl TesterAgent {
    pub fn new(default_timeout_seconds: u64, default_rng_seed: u64) -> Self {
        Self {
            scanner: SecretScanner::new(),
            default_timeout_seconds,
            default_rng_seed,
        }
    }

    /// Latest strategy artifact stored for the workflow (highest attempt of
    /// the lexically-last strategy task).
    async fn find_strategy_artifact(
        &self,
        ctx: &AgentContext<'_>,
    ) -> Result<ArtifactRef, AgentFailure> {
        let artifacts = ctx
            .services
            .artifacts
            .list(&ctx.workflow_id)
            .await
            .map_err(|e| AgentFailure::from_error(format!("artifact listing failed: {e}")))?;
        artifacts
            .into_iter()
            .filter(|a| a.name.starts_with("strategy_"))
            .max_by(|a, b| {
                a.task_id
                    .cmp(&b.task_id)
                    .then(a.attempt_id.cmp(&b.attempt_id))
            })
            .ok_or_else(|| {
                AgentFailure::from_error("no strategy artifact found for workflow")
            })
    }

    fn work_dir(&self, ctx: &AgentContext<'_>) -> PathBuf {
        std::env::temp_dir().join(format!(
            "algoswarm-test-{}-{}",
            ctx.workflow_id,
            Uuid::new_v4().simple()
        ))
    }

    /// Validate required artifacts and parse the test report.
    async fn validate_artifacts(dir: &Path) -> Result<TestReport, String> {
        for name in REQUIRED_ARTIFACTS {
            let path = dir.join(name);
            match tokio::fs::metadata(&path).await {
                Ok(meta) if meta.len() > 0 => {}
                Ok(_) => return Err(format!("required artifact {name} is empty")),
                Err(_) => return Err(format!("required artifact {name} is missing")),
            }
        }
        let report_json = tokio::fs::read_to_string(dir.join("test_report.json"))
            .await
            .map_err(|e| format!("cannot read test_report.json: {e}"))?;
        TestReport::from_json(&report_json)
            .map_err(|e| format!("test_report.json does not match schema: {e}"))
    }

    fn failure(
        &self,
        ctx: &AgentContext<'_>,
        kind: FailureKind,
        outcome: &SandboxOutcome,
        command: String,
        failing_names: Vec<String>,
        message: &str,
    ) -> AgentFailure {
        let report = FailureReport {
            kind,
            failing_names,
            traceback: outcome.combined_output(),
            fixture: "default_bars".to_string(),
            command,
            correlation_id: ctx.correlation_id,
        };
        AgentFailure::classified(message, report)
    }
}

#[async_trait]
impl Agent for TesterAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Tester
    }

    async fn handle(
        &self,
        task: &TodoItem,
        ctx: &AgentContext<'_>,
    ) -> Result<AgentOutput, AgentFailure> {
        let strategy = self.find_strategy_artifact(ctx).await?;
        let source = ctx
            .services
            .artifacts
            .get(&strategy)
            .await
            .map_err(|e| AgentFailure::from_error(format!("artifact fetch failed: {e}")))?;

        let timeout_seconds = task
            .metadata
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_seconds);
        let rng_seed = task
            .metadata
            .get("rng_seed")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_rng_seed);

        let work_dir = self.work_dir(ctx);
        let input_dir = work_dir.join("input");
        tokio::fs::create_dir_all(&input_dir)
            .await
            .map_err(|e| AgentFailure::from_error(format!("workspace setup failed: {e}")))?;
        tokio::fs::write(input_dir.join(&strategy.name), &source)
            .await
            .map_err(|e| AgentFailure::from_error(format!("workspace setup failed: {e}")))?;

        // Two seeded runs: the second exists only for the determinism check.
        let mut outcomes = Vec::with_capacity(2);
        for run in 0..2_u32 {
            let output_dir = work_dir.join(format!("run{run}"));
            let request = SandboxRequest {
                input_dir: input_dir.clone(),
                output_dir: output_dir.clone(),
                rng_seed,
                timeout_seconds,
            };
            let outcome = ctx
                .services
                .sandbox
                .run(request)
                .await
                .map_err(|e| {
                    AgentFailure::classified(
                        format!("sandbox infrastructure failure: {e}"),
                        FailureReport {
                            kind: FailureKind::SandboxError,
                            failing_names: Vec::new(),
                            traceback: e.to_string(),
                            fixture: "default_bars".to_string(),
                            command: repro_command(&input_dir, &output_dir, rng_seed),
                            correlation_id: ctx.correlation_id,
                        },
                    )
                })?;
            outcomes.push((outcome, output_dir));
        }

        let (first, first_dir) = &outcomes[0];
        let (second, second_dir) = &outcomes[1];
        let command = repro_command(&input_dir, first_dir, rng_seed);

        if first.exit_code != 0 {
            let kind = classify_crash(&first.combined_output());
            return Err(self.failure(
                ctx,
                kind,
                first,
                command,
                Vec::new(),
                &format!("sandbox exited with code {}", first.exit_code),
            ));
        }

        // Secret scan on run output before anything is stored or surfaced
        if let Some(matched) = self.scanner.find_secret(&first.combined_output()) {
            warn!(
                workflow_id = %ctx.workflow_id,
                correlation_id = %ctx.correlation_id,
                task_id = %task.id,
                pattern = %matched,
                "secret-like pattern in sandbox output; failing task"
            );
            return Err(AgentFailure::from_error(
                "secret-like pattern detected in sandbox output; flagged to operator",
            ));
        }

        let report = match Self::validate_artifacts(first_dir).await {
            Ok(report) => report,
            Err(reason) => {
                return Err(self.failure(
                    ctx,
                    FailureKind::ArtifactSchema,
                    first,
                    command,
                    Vec::new(),
                    &reason,
                ));
            }
        };

        // Determinism: both runs must agree on headline metrics and the
        // equity curve bit-for-bit.
        let second_report = match Self::validate_artifacts(second_dir).await {
            Ok(report) => report,
            Err(reason) => {
                return Err(self.failure(
                    ctx,
                    FailureKind::ArtifactSchema,
                    second,
                    command,
                    Vec::new(),
                    &format!("second run artifacts invalid: {reason}"),
                ));
            }
        };
        let curves_match = files_equal(
            &first_dir.join("equity_curve.csv"),
            &second_dir.join("equity_curve.csv"),
        )
        .await;
        let pnl_delta =
            (report.summary.net_pnl - second_report.summary.net_pnl).abs();
        if report.summary.total_trades != second_report.summary.total_trades
            || pnl_delta > DETERMINISM_PNL_TOLERANCE
            || !curves_match
        {
            return Err(self.failure(
                ctx,
                FailureKind::NonDeterministic,
                first,
                command,
                Vec::new(),
                &format!(
                    "seeded runs diverged: trades {} vs {}, net_pnl delta {pnl_delta}",
                    report.summary.total_trades, second_report.summary.total_trades
                ),
            ));
        }

        if !report.all_passed() {
            let failing = report.failing_names();
            return Err(self.failure(
                ctx,
                FailureKind::TestFailures,
                first,
                command,
                failing.clone(),
                &format!("{} test(s) failed", failing.len()),
            ));
        }

        // Keep the validated report as a workflow artifact
        let report_bytes = serde_json::to_vec_pretty(&report)
            .map_err(|e| AgentFailure::from_error(e.to_string()))?;
        let stored = ctx
            .services
            .artifacts
            .put(
                &ctx.workflow_id,
                &task.id,
                ctx.attempt,
                &format!("test_report_{}.json", ctx.workflow_id),
                &report_bytes,
            )
            .await
            .map_err(|e| AgentFailure::from_error(format!("failed to store report: {e}")))?;

        let summary = json!({
            "total_trades": report.summary.total_trades,
            "net_pnl": report.summary.net_pnl,
            "win_rate": report.summary.win_rate,
            "max_drawdown": report.summary.max_drawdown,
        });
        let test_event = Event::new(
            EventType::TestResult,
            ctx.correlation_id,
            &ctx.workflow_id,
            self.role().as_str(),
            summary.clone(),
        )
        .with_task_id(&task.id);
        if let Err(e) = ctx
            .services
            .bus
            .publish(channels::TEST_RESULTS, test_event)
            .await
        {
            warn!(
                workflow_id = %ctx.workflow_id,
                correlation_id = %ctx.correlation_id,
                error = %e,
                "failed to publish test result event"
            );
        }

        info!(
            workflow_id = %ctx.workflow_id,
            correlation_id = %ctx.correlation_id,
            task_id = %task.id,
            trades = report.summary.total_trades,
            "strategy passed tests"
        );

        Ok(AgentOutput {
            artifact_refs: vec![stored.to_uri()],
            data: json!({"report": summary}),
        })
    }
}

/// Classify a non-zero-exit sandbox run from the combined output.
///
/// Encoding failures often print only to stderr; the caller must pass
/// stdout and stderr combined.
pub fn classify_crash(combined: &str) -> FailureKind {
    let lower = combined.to_lowercase();
    if lower.contains("unicodeencodeerror")
        || lower.contains("unicodedecodeerror")
        || lower.contains("codec can't")
        || lower.contains("killed")
        || lower.contains("timed out")
    {
        return FailureKind::SandboxError;
    }
    if lower.contains("syntaxerror")
        || lower.contains("parse error")
        || lower.contains("validationerror")
        || lower.contains("failed to parse")
    {
        return FailureKind::StaticFailures;
    }
    FailureKind::StaticFailures
}

fn repro_command(input_dir: &Path, output_dir: &Path, rng_seed: u64) -> String {
    format!(
        "algoswarm-sandbox --input {} --output {} --seed {rng_seed}",
        input_dir.display(),
        output_dir.display()
    )
}

async fn files_equal(a: &Path, b: &Path) -> bool {
    match (tokio::fs::read(a).await, tokio::fs::read(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
