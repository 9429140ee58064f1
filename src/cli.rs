//! Command line interface

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Treasury guard decision engine
#[derive(Parser, Debug)]
#[command(name = "treasury-guard")]
#[command(author, version, about = "Multi-agent treasury decision engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and <TREASURY_ENV>.toml
    #[arg(short, long, global = true, default_value = "config", env = "TREASURY_CONFIG_DIR")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the orchestrator tick loop until Ctrl-C
    Run,
    /// Load and validate configuration, then print it
    CheckConfig,
    /// Print the risk questionnaire
    Quiz,
    /// Allocation for a hypothetical profile
    SimulateAllocation {
        #[arg(long)]
        age: u32,
        /// Risk tolerance 1-10
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=10))]
        risk: u32,
        /// Goals score 1-4
        #[arg(long, default_value_t = 2, value_parser = clap::value_parser!(u32).range(1..=4))]
        goals: u32,
        /// Time horizon in years
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..=30))]
        horizon: u32,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_simulation_arguments() {
        let cli = Cli::parse_from([
            "treasury-guard",
            "simulate-allocation",
            "--age",
            "62",
            "--risk",
            "7",
        ]);
        match cli.command {
            Commands::SimulateAllocation {
                age,
                risk,
                goals,
                horizon,
            } => {
                assert_eq!((age, risk, goals, horizon), (62, 7, 2, 5));
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn rejects_out_of_range_risk() {
        let result = Cli::try_parse_from([
            "treasury-guard",
            "simulate-allocation",
            "--age",
            "30",
            "--risk",
            "11",
        ]);
        assert!(result.is_err());
    }
}
