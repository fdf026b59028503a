//! Tester agent classification tests, including the stderr-only encoding
//! failure routing and the two-run determinism check.

mod common;

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use algoswarm::agents::{Agent, AgentContext, AgentServices, TesterAgent};
use algoswarm::domain::models::{channels, AgentRole, EventType, FailureKind, TodoItem};
use algoswarm::domain::ports::{ArtifactStore, MessageBus, SandboxOutcome};
use algoswarm::infrastructure::artifacts::FsArtifactStore;
use algoswarm::services::InMemoryBus;
use uuid::Uuid;

use common::{fast_retry, router_with, FakeSandbox, ScriptedLlmClient};

const WORKFLOW_ID: &str = "wf_testersuite01";

fn services_with_sandbox(
    bus: Arc<InMemoryBus>,
    artifact_root: &Path,
    sandbox: FakeSandbox,
) -> Arc<AgentServices> {
    let client = Arc::new(ScriptedLlmClient::new(|_, _| {
        Err(algoswarm::domain::ports::LlmClientError::NonRetryable(
            "unused".to_string(),
        ))
    }));
    let (router, _, _) = router_with(Vec::new(), client, fast_retry(1));
    Arc::new(AgentServices {
        router,
        artifacts: Arc::new(FsArtifactStore::new(artifact_root)),
        sandbox: Arc::new(sandbox),
        bus,
    })
}

async fn seed_strategy(services: &AgentServices) {
    services
        .artifacts
        .put(
            WORKFLOW_ID,
            "t_gen",
            1,
            &format!("strategy_{WORKFLOW_ID}.dsl"),
            b"entry: sma(5) crosses above sma(20)",
        )
        .await
        .unwrap();
}

fn tester_task() -> TodoItem {
    let mut task = TodoItem::new("t_test", "Backtest the strategy", AgentRole::Tester);
    task.set_workflow_id(WORKFLOW_ID);
    task
}

fn context(services: &AgentServices) -> AgentContext<'_> {
    AgentContext {
        services,
        workflow_id: WORKFLOW_ID.to_string(),
        correlation_id: Uuid::new_v4(),
        attempt: 1,
    }
}

fn valid_report_json(net_pnl: f64, all_pass: bool) -> String {
    format!(
        r#"{{"summary": {{"total_trades": 3, "net_pnl": {net_pnl}, "win_rate": 0.66, "max_drawdown": 120.0}},
            "tests": [
                {{"name": "entry_rules", "passed": true}},
                {{"name": "risk_limits", "passed": {all_pass}}}
            ]}}"#
    )
}

/// Sandbox that writes a full set of artifacts per run.
fn writing_sandbox(net_pnl_of_run: impl Fn(u32) -> f64 + Send + Sync + 'static, all_pass: bool) -> FakeSandbox {
    let run_counter = AtomicU32::new(0);
    FakeSandbox::new(move |request| {
        let run = run_counter.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(&request.output_dir).unwrap();
        std::fs::write(
            request.output_dir.join("test_report.json"),
            valid_report_json(net_pnl_of_run(run), all_pass),
        )
        .unwrap();
        std::fs::write(request.output_dir.join("trades.csv"), "position_id,side\n1,buy\n").unwrap();
        std::fs::write(
            request.output_dir.join("equity_curve.csv"),
            "timestamp,equity\n2024-01-01T00:00:00Z,10000\n",
        )
        .unwrap();
        std::fs::write(request.output_dir.join("events.log"), "order filled\n").unwrap();
        Ok(SandboxOutcome {
            exit_code: 0,
            stdout: "run complete".to_string(),
            stderr: String::new(),
            duration_seconds: 0.05,
            artifacts_dir: request.output_dir.clone(),
        })
    })
}

#[tokio::test]
async fn test_scenario_f_stderr_only_encoding_failure() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let sandbox = FakeSandbox::new(|request| {
        Ok(SandboxOutcome {
            exit_code: 1,
            stdout: "[OK] Strategy initialized".to_string(),
            stderr: "UnicodeEncodeError: 'ascii' codec can't encode character '\\u2192'"
                .to_string(),
            duration_seconds: 0.2,
            artifacts_dir: request.output_dir.clone(),
        })
    });
    let services = services_with_sandbox(bus, dir.path(), sandbox);
    seed_strategy(&services).await;

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();

    let report = failure.failure.expect("classified failure");
    assert_eq!(report.kind, FailureKind::SandboxError);
    // The combined traceback preserves the stderr-only encoding error and
    // the clean stdout line
    assert!(report.traceback.contains("UnicodeEncodeError"));
    assert!(report.traceback.contains("[OK] Strategy initialized"));
    assert!(!report.command.is_empty());
}

#[tokio::test]
async fn test_passing_run_stores_report_and_publishes_result() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let services = services_with_sandbox(bus.clone(), dir.path(), writing_sandbox(|_| 250.0, true));
    seed_strategy(&services).await;

    let mut results = bus.subscribe(channels::TEST_RESULTS).await.unwrap();

    let tester = TesterAgent::new(30, 42);
    let output = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap();

    assert_eq!(output.artifact_refs.len(), 1);
    assert!(output.artifact_refs[0].contains(WORKFLOW_ID));

    let event = results.recv().await.unwrap();
    assert_eq!(event.event_type, EventType::TestResult);
    assert_eq!(event.workflow_id, WORKFLOW_ID);
    assert_eq!(event.data["total_trades"], 3);
}

#[tokio::test]
async fn test_failing_tests_classified_with_names() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let services = services_with_sandbox(bus, dir.path(), writing_sandbox(|_| 250.0, false));
    seed_strategy(&services).await;

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();

    let report = failure.failure.expect("classified failure");
    assert_eq!(report.kind, FailureKind::TestFailures);
    assert_eq!(report.failing_names, vec!["risk_limits"]);
}

#[tokio::test]
async fn test_divergent_seeded_runs_classified_non_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    // Second run reports a different net P&L than the first
    let services = services_with_sandbox(
        bus,
        dir.path(),
        writing_sandbox(|run| if run == 0 { 250.0 } else { 251.5 }, true),
    );
    seed_strategy(&services).await;

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();

    let report = failure.failure.expect("classified failure");
    assert_eq!(report.kind, FailureKind::NonDeterministic);
}

#[tokio::test]
async fn test_missing_artifacts_classified_artifact_schema() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let services = services_with_sandbox(bus, dir.path(), FakeSandbox::silent_ok());
    seed_strategy(&services).await;

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();

    let report = failure.failure.expect("classified failure");
    assert_eq!(report.kind, FailureKind::ArtifactSchema);
}

#[tokio::test]
async fn test_secret_in_output_fails_without_fix_task_classification() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let sandbox = FakeSandbox::new(|request| {
        Ok(SandboxOutcome {
            exit_code: 0,
            stdout: "loaded api_key=sk-live-abcdefghijklmnopqrstuvwx".to_string(),
            stderr: String::new(),
            duration_seconds: 0.1,
            artifacts_dir: request.output_dir.clone(),
        })
    });
    let services = services_with_sandbox(bus, dir.path(), sandbox);
    seed_strategy(&services).await;

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();

    // Secret leaks are flagged, never routed for an automatic fix
    assert!(failure.failure.is_none());
    assert!(failure.error.contains("secret-like pattern"));
}

#[tokio::test]
async fn test_missing_strategy_artifact_fails() {
    let dir = tempfile::tempdir().unwrap();
    let bus = Arc::new(InMemoryBus::new());
    let services = services_with_sandbox(bus, dir.path(), FakeSandbox::silent_ok());
    // No strategy seeded

    let tester = TesterAgent::new(30, 42);
    let failure = tester
        .handle(&tester_task(), &context(&services))
        .await
        .unwrap_err();
    assert!(failure.error.contains("no strategy artifact"));
}
