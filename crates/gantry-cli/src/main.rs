//! Gantry CLI entrypoint.

use clap::Parser;
use console::style;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;
mod logging;

use commands::Commands;
use config::CliConfig;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "gantry")]
#[command(author, version, about = "Gantry CI pipeline orchestrator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true, env = "GANTRY_LOG_FORMAT")]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.log_format);

    let config = match CliConfig::load() {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(error = %format!("{:#}", e), "Ignoring unreadable config file");
            CliConfig::default()
        }
    };

    let result = match cli.command {
        Commands::Init { force } => handlers::init(force).await,
        Commands::Validate { path } => handlers::validate(&path).await,
        Commands::Plan {
            path,
            matrix,
            output,
        } => handlers::plan(&path, matrix, output.unwrap_or(config.output_format)).await,
        Commands::Run(args) => handlers::run(&config, args).await,
        Commands::Schema => handlers::schema(),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            handlers::exit_code_for(&e)
        }
    }
}
