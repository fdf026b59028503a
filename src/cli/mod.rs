//! CLI definitions.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Exit codes reported to the shell.
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILED_AFTER_ITERATIONS: i32 = 1;
    pub const INVALID_TODO_LIST: i32 = 2;
    pub const ALL_KEYS_EXHAUSTED: i32 = 3;
    pub const SANDBOX_ERROR: i32 = 4;
}

#[derive(Debug, Parser)]
#[command(name = "algoswarm", version, about = "Multi-agent trading-strategy build pipeline")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Emit machine-readable JSON where supported
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Execute a TodoList iteratively until success or the iteration cap
    Run {
        /// Path to the TodoList JSON file
        todo: PathBuf,

        /// Override the configured iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,
    },

    /// Validate a TodoList file (schema + DAG) without executing it
    Validate {
        /// Path to the TodoList JSON file
        todo: PathBuf,
    },

    /// Replay scripted orders against a bar series in the backtest engine
    Backtest {
        /// Bars CSV: timestamp,open,high,low,close[,volume]
        #[arg(long)]
        bars: PathBuf,

        /// Scripted orders JSON: [{"bar_index", "side", "volume", ...}]
        #[arg(long)]
        orders: PathBuf,

        /// Directory for trades.csv / equity_curve.csv / test_report.json
        #[arg(long, default_value = "backtest-out")]
        out: PathBuf,

        /// RNG seed for slippage
        #[arg(long, default_value_t = 42)]
        seed: u64,

        /// Starting balance
        #[arg(long, default_value_t = 10_000.0)]
        balance: f64,
    },

    /// Show key catalog health
    Keys {
        /// Path to the key catalog JSON (defaults to the configured path)
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
}
