use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use treasury_guard::agents::profiler::quiz_questions;
use treasury_guard::config::AppConfig;
use treasury_guard::engine::TreasuryEngine;
use treasury_guard::error::Result;

mod cli;
mod main_runtime;

use cli::{Cli, Commands};
use main_runtime::{init_logging, init_logging_simple, signal_shutdown};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run => {
            let config = AppConfig::load_validated(&cli.config_dir)?;
            init_logging(&config.logging);
            run_engine(config).await?;
        }
        Commands::CheckConfig => {
            init_logging_simple();
            let config = AppConfig::load_from(&cli.config_dir)?;
            match config.validate() {
                Ok(()) => {
                    println!("{}", serde_json::to_string_pretty(&config)?);
                    println!("\x1b[32m✓ configuration is valid\x1b[0m");
                }
                Err(errors) => {
                    for e in &errors {
                        println!("\x1b[31m✗ {}\x1b[0m", e);
                    }
                    std::process::exit(1);
                }
            }
        }
        Commands::Quiz => {
            for q in quiz_questions() {
                println!("{}. [{:?}, weight {}] {}", q.id, q.category, q.weight, q.question);
                for (i, option) in q.options.iter().enumerate() {
                    println!("     {}) {}", i, option);
                }
            }
        }
        Commands::SimulateAllocation {
            age,
            risk,
            goals,
            horizon,
        } => {
            init_logging_simple();
            let engine = TreasuryEngine::new(AppConfig::load_validated(&cli.config_dir)?)?;
            let allocation = engine
                .profiler()
                .simulate_allocation(age, risk, goals, horizon);
            println!("{}", serde_json::to_string_pretty(&allocation)?);
        }
    }

    Ok(())
}

async fn run_engine(config: AppConfig) -> Result<()> {
    let engine = Arc::new(TreasuryEngine::new(config)?);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.run(shutdown_rx).await })
    };

    info!(
        "Treasury guard running (tick every {} ms), press Ctrl-C to stop",
        engine.config().orchestrator.tick_interval_ms
    );
    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {}", e);
    }

    info!("Shutdown requested");
    signal_shutdown(&shutdown_tx);
    match runner.await {
        Ok(result) => result?,
        Err(e) => error!("Ticker task panicked: {}", e),
    }

    let status = engine.status().await;
    info!(
        "Final state: {}% stablecoins, {} completed, {} failed, {} rejected",
        status.allocation.stablecoin_percent,
        status.orchestrator.completed,
        status.orchestrator.failed,
        status.orchestrator.rejected
    );
    Ok(())
}
