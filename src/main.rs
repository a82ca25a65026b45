//! Echelon CLI entry point.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use echelon::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init(args) => echelon::cli::commands::init::execute(args, cli.json).await,
        Commands::Status(args) => echelon::cli::commands::status::execute(args, cli.json).await,
        Commands::Report(args) => echelon::cli::commands::report::execute(args, cli.json).await,
        Commands::Budget(args) => echelon::cli::commands::budget::execute(args, cli.json).await,
    };

    if let Err(err) = result {
        echelon::cli::handle_error(err, cli.json);
    }
}
