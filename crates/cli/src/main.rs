mod cli;
mod commands;

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use blade_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    load_dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = CliArgs::parse();
    let config = match args.profile.as_deref() {
        Some(profile) => Config::for_profile(profile),
        None => Config::from_env(),
    };

    match args.command {
        Command::Config => {
            println!("{}", serde_json::to_string_pretty(&config.redacted_summary())?);
            Ok(ExitCode::SUCCESS)
        }
        Command::Plan {
            data_type,
            filters,
            limit,
        } => {
            config.sync.validate().context("invalid sync configuration")?;
            commands::plan(&config, &data_type, &filters, limit)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Item { data_type, id } => {
            config.sync.validate().context("invalid sync configuration")?;
            commands::item(&config, &data_type, &id).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sources => {
            config.validate().context("invalid configuration")?;
            commands::sources(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Sync(target) => {
            config.validate().context("invalid configuration")?;
            config.log_summary();
            commands::sync(&config, target).await
        }
    }
}
