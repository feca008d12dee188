use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use stockwatch::cli::setup::setup;
use stockwatch::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for stockwatch::AppCommand {
    fn from(cmd: Commands) -> stockwatch::AppCommand {
        match cmd {
            Commands::Serve => stockwatch::AppCommand::Serve,
            Commands::RebuildIndex => stockwatch::AppCommand::RebuildIndex,
            Commands::Weeks => stockwatch::AppCommand::Weeks,
            Commands::Show { week } => stockwatch::AppCommand::Show { week },
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the watchlist HTTP server
    Serve,
    /// Rebuild index.json from the week bucket files
    RebuildIndex,
    /// List known weeks with per-list counts
    Weeks,
    /// Show the watchlist with current prices
    Show {
        /// Week end dates or ranges, e.g. 2024-01-07 or 2024-01-01..2024-02-01
        #[arg(short, long)]
        week: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => setup(),
        Some(cmd) => stockwatch::run_command(cmd.into(), cli.config_path.as_deref()).await,
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
