//! CLI command handlers.

use anyhow::{Context, Result};
use chrono::DateTime;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::error;

use crate::agents::{
    spawn_worker, AgentServices, ArchitectAgent, CoderAgent, DebuggerAgent, PlannerAgent,
    TesterAgent,
};
use crate::domain::models::api_key::{ApiKeyMetadata, KeyCatalog};
use crate::domain::models::config::Config;
use crate::domain::models::{Bar, OrderRequest, OrderSide, SimConfig, TodoList, WorkflowOutcome};
use crate::infrastructure::artifacts::FsArtifactStore;
use crate::infrastructure::llm::{HttpLlmClient, HttpLlmClientConfig};
use crate::infrastructure::sandbox::ProcessSandbox;
use crate::infrastructure::secrets::build_secret_store;
use crate::services::{
    ConversationStore, DependencyResolver, InMemoryBus, IterativeLoop, IterativeLoopConfig,
    KeyManager, LlmRouter, Orchestrator, RateLimiterService,
};

use super::exit_codes;

/// Validate a TodoList file. Exit code 2 on any schema or DAG violation.
pub async fn handle_validate(path: &Path, json_output: bool) -> Result<i32> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let result = TodoList::from_json(&content)
        .map_err(|e| e.to_string())
        .and_then(|list| {
            list.validate()?;
            DependencyResolver::new()
                .validate(&list.items)
                .map_err(|e| e.to_string())?;
            Ok(list)
        });

    match result {
        Ok(list) => {
            if json_output {
                println!(
                    "{}",
                    serde_json::json!({"valid": true, "tasks": list.items.len()})
                );
            } else {
                println!("valid: {} tasks", list.items.len());
            }
            Ok(exit_codes::SUCCESS)
        }
        Err(reason) => {
            if json_output {
                println!("{}", serde_json::json!({"valid": false, "error": reason}));
            } else {
                eprintln!("invalid TodoList: {reason}");
            }
            Ok(exit_codes::INVALID_TODO_LIST)
        }
    }
}

/// Run a workflow end to end: build the service stack, spawn the agent
/// workers, drive the iterative loop, map the outcome to an exit code.
pub async fn handle_run(
    config: &Config,
    todo_path: &Path,
    max_iterations: Option<u32>,
    json_output: bool,
) -> Result<i32> {
    let content = tokio::fs::read_to_string(todo_path)
        .await
        .with_context(|| format!("failed to read {}", todo_path.display()))?;
    let todo = match TodoList::from_json(&content) {
        Ok(todo) => todo,
        Err(e) => {
            eprintln!("invalid TodoList: {e}");
            return Ok(exit_codes::INVALID_TODO_LIST);
        }
    };

    // Service stack
    let bus = Arc::new(InMemoryBus::new());
    let secrets = build_secret_store(&config.secrets)?;
    let limiter = Arc::new(RateLimiterService::in_memory());
    let catalog = load_catalog(config).await?;
    let key_manager = Arc::new(KeyManager::new(
        catalog,
        limiter,
        secrets,
        config.router.model_family_fallback,
    ));
    let conversations = Arc::new(ConversationStore::new(config.conversation.ttl_seconds));
    let sweeper = {
        let conversations = conversations.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(300));
            loop {
                tick.tick().await;
                conversations.sweep_expired().await;
            }
        })
    };
    let llm_client = Arc::new(
        HttpLlmClient::new(HttpLlmClientConfig {
            base_url: config.llm.base_url.clone(),
            timeout_secs: config.llm.request_timeout_seconds,
        })
        .map_err(|e| anyhow::anyhow!("failed to build LLM client: {e}"))?,
    );
    let router = Arc::new(LlmRouter::new(
        key_manager,
        conversations,
        llm_client,
        config.retry.clone(),
        config.router.clone(),
    ));
    let artifacts = Arc::new(FsArtifactStore::new(
        Path::new(&config.orchestrator.state_dir).join("artifacts"),
    ));
    let sandbox = Arc::new(ProcessSandbox::new(config.sandbox.clone()));

    let services = Arc::new(AgentServices {
        router,
        artifacts,
        sandbox,
        bus: bus.clone(),
    });

    let model = config.router.default_model.clone();
    let agents: Vec<Arc<dyn crate::agents::Agent>> = vec![
        Arc::new(PlannerAgent::new(model.clone())),
        Arc::new(ArchitectAgent::new(model.clone())),
        Arc::new(CoderAgent::new(model.clone())),
        Arc::new(TesterAgent::new(config.sandbox.timeout_seconds, 42)),
        Arc::new(DebuggerAgent::new(model)),
    ];
    let mut workers = Vec::with_capacity(agents.len());
    for agent in agents {
        workers.push(
            spawn_worker(services.clone(), agent)
                .await
                .map_err(|e| anyhow::anyhow!("agent worker setup failed: {e}"))?,
        );
    }

    let orchestrator = Arc::new(Orchestrator::new(bus, config.orchestrator.clone()));
    let workflow_id = match orchestrator.create_workflow(todo).await {
        Ok(id) => id,
        Err(e) => {
            error!(error = %e, "workflow creation failed");
            eprintln!("invalid TodoList: {e}");
            return Ok(exit_codes::INVALID_TODO_LIST);
        }
    };

    let loop_config = IterativeLoopConfig {
        max_iterations: max_iterations.unwrap_or(config.orchestrator.max_iterations),
        max_duration: Duration::from_secs(config.orchestrator.max_duration_seconds),
    };
    let report = IterativeLoop::new(orchestrator, loop_config)
        .run(&workflow_id)
        .await?;

    for worker in workers {
        worker.abort();
    }
    sweeper.abort();

    // Persist the terminal report next to the workflow's TodoList
    let report_path = Path::new(&config.orchestrator.state_dir)
        .join(&workflow_id)
        .join("report.json");
    if let Some(parent) = report_path.parent() {
        tokio::fs::create_dir_all(parent).await.ok();
    }
    tokio::fs::write(&report_path, serde_json::to_vec_pretty(&report)?)
        .await
        .with_context(|| format!("failed to write {}", report_path.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        match &report.outcome {
            WorkflowOutcome::Success => println!("workflow {workflow_id} succeeded"),
            WorkflowOutcome::FailedAfterIterations { iterations } => {
                println!("workflow {workflow_id} failed after {iterations} iteration(s)");
                for (task, err) in &report.last_errors {
                    println!("  {task}: {err}");
                }
            }
            WorkflowOutcome::Aborted { reason } => {
                println!("workflow {workflow_id} aborted: {reason}");
            }
        }
    }

    Ok(exit_code_for(&report.outcome, &report.last_errors))
}

/// Map a terminal outcome (plus per-task error text) to the CLI contract.
fn exit_code_for(
    outcome: &WorkflowOutcome,
    last_errors: &std::collections::HashMap<String, String>,
) -> i32 {
    match outcome {
        WorkflowOutcome::Success => exit_codes::SUCCESS,
        WorkflowOutcome::Aborted { .. } => exit_codes::INVALID_TODO_LIST,
        WorkflowOutcome::FailedAfterIterations { .. } => {
            if last_errors.values().any(|e| e.contains("All keys exhausted")) {
                exit_codes::ALL_KEYS_EXHAUSTED
            } else if last_errors
                .values()
                .any(|e| e.contains("sandbox infrastructure"))
            {
                exit_codes::SANDBOX_ERROR
            } else {
                exit_codes::FAILED_AFTER_ITERATIONS
            }
        }
    }
}

async fn load_catalog(config: &Config) -> Result<KeyCatalog> {
    if !config.router.multi_key_enabled {
        // Single-key fallback: one synthesized entry resolved through the
        // same secret-store path, generous windows (reservation is moot).
        return Ok(KeyCatalog {
            keys: vec![ApiKeyMetadata::new(
                "default",
                config.router.default_model.clone(),
                "gateway",
                10_000,
                100_000_000,
            )],
            fallback_order: None,
        });
    }
    let content = tokio::fs::read_to_string(&config.router.key_catalog_path)
        .await
        .with_context(|| {
            format!("failed to read key catalog {}", config.router.key_catalog_path)
        })?;
    KeyCatalog::from_json(&content).context("invalid key catalog")
}

/// One scripted order in the backtest replay file.
#[derive(Debug, Deserialize)]
struct ScriptedOrder {
    bar_index: usize,
    side: String,
    volume: f64,
    #[serde(default)]
    stop_loss: Option<f64>,
    #[serde(default)]
    take_profit: Option<f64>,
}

/// Replay scripted orders against a bar series and write the report.
pub async fn handle_backtest(
    bars_path: &Path,
    orders_path: &Path,
    out_dir: &Path,
    seed: u64,
    balance: f64,
) -> Result<i32> {
    let bars = parse_bars_csv(
        &tokio::fs::read_to_string(bars_path)
            .await
            .with_context(|| format!("failed to read {}", bars_path.display()))?,
    )?;
    let scripted: Vec<ScriptedOrder> = serde_json::from_str(
        &tokio::fs::read_to_string(orders_path)
            .await
            .with_context(|| format!("failed to read {}", orders_path.display()))?,
    )
    .context("invalid orders file")?;

    let config = SimConfig {
        starting_balance: balance,
        rng_seed: seed,
        ..SimConfig::default()
    };
    let mut broker = crate::sim::SimBroker::new(config);

    for (index, bar) in bars.iter().enumerate() {
        broker
            .step_bar(*bar)
            .map_err(|e| anyhow::anyhow!("bar {index}: {e}"))?;
        for order in scripted.iter().filter(|o| o.bar_index == index) {
            let side = match order.side.to_lowercase().as_str() {
                "buy" => OrderSide::Buy,
                "sell" => OrderSide::Sell,
                other => anyhow::bail!("unknown order side: {other}"),
            };
            let mut request = OrderRequest::market(side, order.volume);
            request.stop_loss = order.stop_loss;
            request.take_profit = order.take_profit;
            if let Err(e) = broker.place_order(request) {
                eprintln!("order at bar {index} rejected: {e}");
            }
        }
    }

    broker.save_report(out_dir)?;
    let report = broker.generate_report();
    println!("{}", report.summary);
    Ok(exit_codes::SUCCESS)
}

/// Parse `timestamp,open,high,low,close[,volume]` rows.
fn parse_bars_csv(content: &str) -> Result<Vec<Bar>> {
    let mut bars = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("timestamp") {
            continue;
        }
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() < 5 {
            anyhow::bail!("line {}: expected at least 5 fields", line_no + 1);
        }
        let timestamp = DateTime::parse_from_rfc3339(fields[0])
            .with_context(|| format!("line {}: bad timestamp", line_no + 1))?
            .with_timezone(&chrono::Utc);
        bars.push(Bar {
            timestamp,
            open: fields[1].parse()?,
            high: fields[2].parse()?,
            low: fields[3].parse()?,
            close: fields[4].parse()?,
            volume: fields.get(5).and_then(|v| v.parse().ok()),
        });
    }
    if bars.is_empty() {
        anyhow::bail!("no bars in input");
    }
    Ok(bars)
}

/// Print key catalog entries with secret availability.
pub async fn handle_keys(config: &Config, catalog_path: Option<&Path>, json_output: bool) -> Result<i32> {
    let catalog = match catalog_path {
        Some(path) => {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            KeyCatalog::from_json(&content).context("invalid key catalog")?
        }
        None => load_catalog(config).await?,
    };

    let secrets = build_secret_store(&config.secrets)?;
    let mut rows = Vec::new();
    for key in &catalog.keys {
        let has_secret = secrets.fetch(&key.key_id).await.is_ok();
        rows.push(serde_json::json!({
            "key_id": key.key_id,
            "model_name": key.model_name,
            "provider": key.provider,
            "rpm": key.rpm,
            "tpm": key.tpm,
            "workload_tag": key.workload_tag,
            "active": key.active,
            "secret_available": has_secret,
        }));
    }

    if json_output {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for row in &rows {
            println!(
                "{} model={} rpm={} tpm={} tag={} active={} secret={}",
                row["key_id"].as_str().unwrap_or(""),
                row["model_name"].as_str().unwrap_or(""),
                row["rpm"],
                row["tpm"],
                row["workload_tag"].as_str().unwrap_or("-"),
                row["active"],
                row["secret_available"]
            );
        }
    }
    Ok(exit_codes::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bars_csv() {
        let csv = "timestamp,open,high,low,close,volume\n\
2024-01-01T00:00:00Z,100,105,95,102,1000\n\
2024-01-01T00:01:00Z,102,104,101,103\n";
        let bars = parse_bars_csv(csv).unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].volume, Some(1000.0));
        assert_eq!(bars[1].volume, None);
        assert_eq!(bars[1].open, 102.0);
    }

    #[test]
    fn test_parse_bars_csv_rejects_short_rows() {
        assert!(parse_bars_csv("2024-01-01T00:00:00Z,100,105\n").is_err());
        assert!(parse_bars_csv("").is_err());
    }

    #[test]
    fn test_exit_code_mapping() {
        use std::collections::HashMap;
        let mut errors = HashMap::new();
        assert_eq!(
            exit_code_for(&WorkflowOutcome::Success, &errors),
            exit_codes::SUCCESS
        );

        errors.insert("t1".to_string(), "All keys exhausted for model preference flash".to_string());
        assert_eq!(
            exit_code_for(&WorkflowOutcome::FailedAfterIterations { iterations: 3 }, &errors),
            exit_codes::ALL_KEYS_EXHAUSTED
        );

        errors.clear();
        errors.insert("t1".to_string(), "sandbox infrastructure failure: spawn".to_string());
        assert_eq!(
            exit_code_for(&WorkflowOutcome::FailedAfterIterations { iterations: 3 }, &errors),
            exit_codes::SANDBOX_ERROR
        );

        errors.clear();
        errors.insert("t1".to_string(), "tests failed".to_string());
        assert_eq!(
            exit_code_for(&WorkflowOutcome::FailedAfterIterations { iterations: 3 }, &errors),
            exit_codes::FAILED_AFTER_ITERATIONS
        );
    }
}
