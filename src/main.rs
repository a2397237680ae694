use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use finpulse::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Pin the local clock, e.g. 2025-11-05T13:28
    #[arg(long, global = true)]
    at: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum RefreshCommand {
    /// Borsa Istanbul stock quotes
    Stocks,
    /// Currency, gold and crypto rates
    Currencies,
    /// Detail for one mutual fund (counts against the daily quota)
    Fund { code: String },
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Run the HTTP server
    Serve,
    /// Show quota usage and cached entries
    Status,
    /// Run the fetch-or-serve flow once for a resource
    Refresh {
        #[command(subcommand)]
        target: RefreshCommand,
    },
}

impl From<Commands> for finpulse::AppCommand {
    fn from(cmd: Commands) -> finpulse::AppCommand {
        match cmd {
            Commands::Serve => finpulse::AppCommand::Serve,
            Commands::Status => finpulse::AppCommand::Status,
            Commands::Refresh { target } => finpulse::AppCommand::Refresh(match target {
                RefreshCommand::Stocks => finpulse::RefreshTarget::Stocks,
                RefreshCommand::Currencies => finpulse::RefreshTarget::Currencies,
                RefreshCommand::Fund { code } => finpulse::RefreshTarget::Fund(code),
            }),
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => match cli.config_path.as_deref() {
            Some(path) => finpulse::cli::setup::setup_at_path(path),
            None => finpulse::cli::setup::setup(),
        },
        Some(cmd) => {
            let at = cli.at.as_deref().map(finpulse::parse_at).transpose()?;
            finpulse::run_command(cmd.into(), cli.config_path.as_deref(), at).await
        }
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
