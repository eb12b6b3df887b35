mod config;
mod telemetry;

use clap::{Args, Parser};
use config::{Config, ConfigError};
use proxy::errors::ProxyError;
use std::path::PathBuf;
use std::process::ExitCode;
use telemetry::TelemetryError;

#[derive(Parser)]
#[command(version, about = "HTTP proxy that injects latency and failures")]
enum CliCommand {
    /// Serve the proxy and admin listeners
    Proxy(ConfigArgs),
    /// Validate a config file and print endpoint override warnings
    CheckConfig(ConfigArgs),
}

#[derive(Args)]
struct ConfigArgs {
    #[arg(long)]
    config_file: PathBuf,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Invalid(#[from] proxy::config::ValidationError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("could not start runtime: {0}")]
    Runtime(#[from] std::io::Error),
    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

fn main() -> ExitCode {
    let cli = CliCommand::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: CliCommand) -> Result<(), CliError> {
    match cli {
        CliCommand::Proxy(args) => {
            let config = Config::from_file(&args.config_file)?;
            let _telemetry = telemetry::init(&config.common)?;

            tracing::info!(config_file = %args.config_file.display(), "starting latency-poison");
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?;
            let result = runtime.block_on(proxy::run(config.proxy));
            if let Err(e) = &result {
                tracing::error!(error = %e, "proxy stopped");
            }
            Ok(result?)
        }
        CliCommand::CheckConfig(args) => {
            let config = Config::from_file(&args.config_file)?;
            let warnings = config.proxy.validate()?;
            for warning in &warnings {
                println!(
                    "warning: collection {} endpoint {} {}",
                    warning.collection_id, warning.endpoint_id, warning.conflict
                );
            }
            println!("{}: ok", args.config_file.display());
            Ok(())
        }
    }
}
