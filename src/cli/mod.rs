//! CLI surface: clap command definitions and their implementations.

use clap::{Parser, Subcommand};

pub mod commands;
pub mod output;

#[derive(Parser)]
#[command(name = "echelon")]
#[command(about = "Echelon - coordination core for hierarchical agent runs", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the execution-state document for a run
    Init(commands::init::InitArgs),

    /// Show run status, task counts, and the budget rollup
    Status(commands::status::StatusArgs),

    /// Apply an agent's textual report to the run state
    Report(commands::report::ReportArgs),

    /// Token budget operations
    Budget(commands::budget::BudgetArgs),
}

/// Print the error and exit non-zero. JSON mode keeps stdout parseable by
/// emitting the error as an object on stderr.
pub fn handle_error(err: anyhow::Error, json_mode: bool) {
    if json_mode {
        eprintln!(
            "{}",
            serde_json::json!({ "error": format!("{err:#}") })
        );
    } else {
        eprintln!("Error: {err:#}");
    }
    std::process::exit(1);
}
