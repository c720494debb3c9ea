//! Sage Council CLI entry point.

use clap::Parser;

use sage_council::cli::commands::{consult, health, load_config};
use sage_council::cli::{handle_error, Cli, Commands};
use sage_council::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => handle_error(&err, cli.json),
    };

    let _logger = match LoggerImpl::init(&LogConfig::from(&config.logging)) {
        Ok(logger) => Some(logger),
        Err(err) => {
            eprintln!("warning: logging disabled: {err}");
            None
        }
    };

    let result = match cli.command {
        Commands::Consult(args) => consult::execute(args, &config, cli.json).await,
        Commands::Health => health::execute(&config, cli.json).await,
    };

    if let Err(err) = result {
        handle_error(&err, cli.json);
    }
}
