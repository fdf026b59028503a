//! Backtest report and test-report schema.
//!
//! `TestReport` is the sandbox output contract validated by the Tester; field
//! names are canonical and relied on by validators.

use serde::{Deserialize, Serialize};

use super::market::{EquityPoint, SimConfig, Trade};

/// Summary metrics computed over closed trades and the equity curve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    pub win_rate: f64,
    pub avg_profit: f64,
    pub avg_loss: f64,
    pub expectancy: f64,
    pub total_gross_pnl: f64,
    pub total_commissions: f64,
    pub total_net_pnl: f64,
    pub return_pct: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub profit_factor: f64,
}

/// Full backtest report returned by `SimBroker::generate_report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub metrics: Metrics,
    pub trades: Vec<Trade>,
    pub equity_curve: Vec<EquityPoint>,
    pub config: SimConfig,
    pub summary: String,
}

/// `test_report.json` summary block. Canonical field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReportSummary {
    pub total_trades: usize,
    pub net_pnl: f64,
    pub win_rate: f64,
    pub max_drawdown: f64,
}

/// One test entry in `test_report.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseResult {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Schema of the sandbox's required `test_report.json` artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    pub summary: TestReportSummary,
    pub tests: Vec<TestCaseResult>,
}

impl TestReport {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Names of failing tests.
    pub fn failing_names(&self) -> Vec<String> {
        self.tests
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.name.clone())
            .collect()
    }

    pub fn all_passed(&self) -> bool {
        self.tests.iter().all(|t| t.passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_schema_roundtrip() {
        let json = r#"{
            "summary": {"total_trades": 4, "net_pnl": 120.5, "win_rate": 0.75, "max_drawdown": 30.0},
            "tests": [
                {"name": "entry_rules", "passed": true},
                {"name": "risk_limits", "passed": false, "message": "SL exceeds 2%"}
            ]
        }"#;
        let report = TestReport::from_json(json).unwrap();
        assert_eq!(report.summary.total_trades, 4);
        assert!(!report.all_passed());
        assert_eq!(report.failing_names(), vec!["risk_limits"]);
    }

    #[test]
    fn test_missing_summary_is_schema_error() {
        let json = r#"{"tests": []}"#;
        let parsed: Result<TestReport, _> = serde_json::from_str(json);
        assert!(parsed.is_err());
    }
}
