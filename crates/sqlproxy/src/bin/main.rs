use anyhow::Result;
use clap::{Parser, ValueEnum};
use sqlproxy::commands::Commands;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LoggingMode {
    #[default]
    Pretty,
    Json,
    Compact,
}

impl From<LoggingMode> for logutil::LoggingMode {
    fn from(mode: LoggingMode) -> Self {
        match mode {
            LoggingMode::Pretty => logutil::LoggingMode::Pretty,
            LoggingMode::Json => logutil::LoggingMode::Json,
            LoggingMode::Compact => logutil::LoggingMode::Compact,
        }
    }
}

#[derive(Parser)]
#[clap(name = "sqlproxy")]
#[clap(version)]
#[clap(about = "SQL proxy with transparent field encryption", long_about = None)]
struct Cli {
    /// Log verbosity.
    #[clap(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output logs in the given format.
    #[clap(long, value_enum)]
    log_mode: Option<LoggingMode>,

    #[clap(subcommand)]
    command: Commands,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Only the server logs by default, client commands print results to
    // stdout.
    match (&cli.command, cli.log_mode, cli.verbose) {
        (Commands::Ping(_) | Commands::Query(_), None, 0) => (),
        _ => logutil::init(cli.verbose, cli.log_mode.unwrap_or_default().into()),
    }

    info!(version = env!("CARGO_PKG_VERSION"), "starting...");

    cli.command.run()
}
