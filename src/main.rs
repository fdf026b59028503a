//! Algoswarm CLI entry point

use algoswarm::cli::{commands, Cli, Commands};
use algoswarm::infrastructure::config::ConfigLoader;
use algoswarm::infrastructure::logging::LoggerImpl;
use anyhow::{Context, Result};
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load().context("Failed to load configuration")?;
    let _logger = LoggerImpl::init(&config.logging).context("Failed to initialize logging")?;

    let exit_code = match cli.command {
        Commands::Run {
            ref todo,
            max_iterations,
        } => commands::handle_run(&config, todo, max_iterations, cli.json).await?,
        Commands::Validate { ref todo } => commands::handle_validate(todo, cli.json).await?,
        Commands::Backtest {
            ref bars,
            ref orders,
            ref out,
            seed,
            balance,
        } => commands::handle_backtest(bars, orders, out, seed, balance).await?,
        Commands::Keys { ref catalog } => {
            commands::handle_keys(&config, catalog.as_deref(), cli.json).await?
        }
    };

    std::process::exit(exit_code);
}
