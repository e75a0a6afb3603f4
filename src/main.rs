use anyhow::Result;
use clap::{Parser, Subcommand};
use rates_bot::core::log::init_logging;

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to optional configuration file
    #[arg(short, long, global = true)]
    config_path: Option<String>,

    /// Keep rates in process memory instead of Redis
    #[arg(long, global = true)]
    memory_store: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

impl From<Commands> for rates_bot::AppCommand {
    fn from(cmd: Commands) -> rates_bot::AppCommand {
        match cmd {
            Commands::Run => rates_bot::AppCommand::Run,
            Commands::Refresh => rates_bot::AppCommand::Refresh,
            Commands::Rates => rates_bot::AppCommand::Rates,
            Commands::Convert { from, to, amount } => {
                rates_bot::AppCommand::Convert { from, to, amount }
            }
            Commands::Setup => unreachable!("Setup command should be handled separately"),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Create default configuration
    Setup,
    /// Refresh rates and serve the chat bot (default)
    Run,
    /// Fetch the latest rates into the store once
    Refresh,
    /// Display stored exchange rates
    Rates,
    /// Convert an amount between two currencies
    Convert {
        /// Source currency code, e.g. USD
        from: String,
        /// Target currency code, e.g. EUR
        to: String,
        /// Amount of the source currency
        #[arg(allow_negative_numbers = true)]
        amount: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    let result = match cli.command {
        Some(Commands::Setup) => rates_bot::cli::setup::setup(),
        Some(cmd) => {
            rates_bot::run_command(cmd.into(), cli.config_path.as_deref(), cli.memory_store).await
        }
        None => {
            rates_bot::run_command(
                rates_bot::AppCommand::Run,
                cli.config_path.as_deref(),
                cli.memory_store,
            )
            .await
        }
    };

    if let Err(e) = &result {
        tracing::error!(error = %e, "Application failed");
    }
    result
}
