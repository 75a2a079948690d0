use anyhow::{Context, Result};
use clap::Parser;
use expiry_config::{ConfigSource, ExpiryConfig};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod commands;

use cli::{Cli, Command};

#[tokio::main]
async fn main() -> Result<()> {
    let env_file_loaded = dotenvy::dotenv().is_ok();
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Sweep summaries and notifications at info. Override via RUST_LOG.
                "info,expiry::watch=info,expiry::sweep=info,expiry::notify=info".into()
            }),
        )
        // stdout carries command output.
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if env_file_loaded {
        info!("loaded .env file");
    }

    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => commands::run(config).await,
        Command::Set { file, when } => commands::set(&config, &file, &when).await,
        Command::Clear { file } => commands::clear(&config, &file).await,
        Command::Show { file } => commands::show(&config, &file).await,
        Command::Files { folder } => commands::files(config, &folder).await,
        Command::Expiring { folder, limit } => {
            commands::expiring(config, folder.as_deref(), limit).await
        }
        Command::Folders { action } => commands::folders(config, action).await,
        Command::Config => commands::print_config(&config),
    }
}

fn load_config(cli: &Cli) -> Result<ExpiryConfig> {
    let (mut config, source) = match &cli.config {
        Some(path) => (
            ExpiryConfig::load_from_file(path)?,
            ConfigSource::File(path.clone()),
        ),
        None => ExpiryConfig::load_from_env()?,
    };

    match &source {
        ConfigSource::Default => info!("using default configuration"),
        ConfigSource::EnvInline => info!("configuration loaded from EXPIRY_CONFIG_JSON"),
        ConfigSource::EnvPath(path) | ConfigSource::File(path) => {
            info!(path = %path.display(), "configuration loaded")
        }
    }

    let warnings = config
        .normalize()
        .context("configuration failed validation")?;
    for warning in warnings.items {
        match warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    Ok(config)
}
