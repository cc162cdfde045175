mod analyze;
mod run;
mod session;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colander_core::Config;

#[derive(Parser)]
#[command(name = "colander")]
#[command(about = "Batch-resolve unparsed recipe ingredients", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a snapshot and print the pattern analysis
    Analyze {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Interactive resolution loop
    Run,
    /// Inspect or discard the saved session
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Print session statistics
    Stats,
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Print the saved session summary and recent operations
    Show,
    /// Delete the saved session file
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command {
        Commands::Analyze { json } => analyze::analyze(config, json).await?,
        Commands::Run => run::run(config).await?,
        Commands::Session { command } => match command {
            SessionCommands::Show => session::show(&config)?,
            SessionCommands::Clear => session::clear(&config)?,
        },
        Commands::Stats => session::stats(&config)?,
    }

    Ok(())
}
