//! Backtest report generation and artifact writing.
//!
//! `save_report` writes the three canonical artifacts consumed by
//! validators: `trades.csv`, `equity_curve.csv`, `test_report.json`.

use std::path::Path;

use crate::domain::models::{
    BacktestReport, Metrics, TestReport, TestReportSummary,
};

use super::broker::SimBroker;
use super::metrics::compute_metrics;

impl SimBroker {
    /// Build the full report over everything executed so far.
    pub fn generate_report(&self) -> BacktestReport {
        let metrics = compute_metrics(
            self.get_trades(),
            self.equity_curve(),
            self.config().starting_balance,
        );
        let summary = summarize(&metrics);
        BacktestReport {
            metrics,
            trades: self.get_trades().to_vec(),
            equity_curve: self.equity_curve().to_vec(),
            config: self.config().clone(),
            summary,
        }
    }

    /// Write `trades.csv`, `equity_curve.csv` and `test_report.json` into
    /// `dir`, creating it if needed.
    pub fn save_report(&self, dir: &Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let report = self.generate_report();

        std::fs::write(dir.join("trades.csv"), trades_csv(&report))?;
        std::fs::write(dir.join("equity_curve.csv"), equity_csv(&report))?;

        let test_report = TestReport {
            summary: TestReportSummary {
                total_trades: report.metrics.total_trades,
                net_pnl: report.metrics.total_net_pnl,
                win_rate: report.metrics.win_rate,
                max_drawdown: report.metrics.max_drawdown,
            },
            tests: Vec::new(),
        };
        let json = serde_json::to_string_pretty(&test_report)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(dir.join("test_report.json"), json)?;
        Ok(())
    }
}

fn summarize(metrics: &Metrics) -> String {
    format!(
        "{} trades, win rate {:.1}%, net P&L {:.2}, max drawdown {:.2} ({:.1}%)",
        metrics.total_trades,
        metrics.win_rate * 100.0,
        metrics.total_net_pnl,
        metrics.max_drawdown,
        metrics.max_drawdown_pct
    )
}

fn trades_csv(report: &BacktestReport) -> String {
    let mut out = String::from(
        "position_id,side,volume,entry_price,exit_price,entry_time,exit_time,close_reason,gross_profit,commission,net_profit\n",
    );
    for trade in &report.trades {
        out.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{},{}\n",
            trade.position_id,
            trade.side.as_str(),
            trade.volume,
            trade.entry_price,
            trade.exit_price,
            trade.entry_time.to_rfc3339(),
            trade.exit_time.to_rfc3339(),
            trade.close_reason.as_str(),
            trade.gross_profit,
            trade.commission,
            trade.net_profit
        ));
    }
    out
}

fn equity_csv(report: &BacktestReport) -> String {
    let mut out =
        String::from("timestamp,balance,equity,used_margin,free_margin,margin_level\n");
    for point in &report.equity_curve {
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            point.timestamp.to_rfc3339(),
            point.balance,
            point.equity,
            point.used_margin,
            point.free_margin,
            point
                .margin_level
                .map_or_else(String::new, |l| l.to_string())
        ));
    }
    out
}
