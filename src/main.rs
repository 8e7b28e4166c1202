//! AudioAlchemy CLI
//!
//! Command-line front end for the stem processing pipeline.

use anyhow::{bail, Context};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use audioalchemy::cli::commands;
use audioalchemy::cli::{Cli, Commands};
use audioalchemy::config::PipelineConfig;
use audioalchemy::project::ProjectStatus;
use audioalchemy::AlchemyError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config =
        PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(root) = cli.root {
        config.root_dir = root;
    }

    info!("AudioAlchemy v{}", env!("CARGO_PKG_VERSION"));

    let result = handle_command(&config, cli.command).await;
    if let Some(err) = result.as_ref().err().and_then(|e| e.downcast_ref::<AlchemyError>()) {
        for suggestion in err.recovery_suggestions() {
            eprintln!("hint: {}", suggestion);
        }
    }
    result
}

async fn handle_command(config: &PipelineConfig, cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Init => commands::init(config)?,
        Commands::Analyze { file } => commands::analyze(config, &file).await?,
        Commands::Enhance { file, output } => commands::enhance(config, &file, &output).await?,
        Commands::Create { name, style, paths } => {
            let project = commands::create(config, &name, &style, &paths).await?;
            if project.status == ProjectStatus::Error {
                let message = project.error.map(|e| e.message).unwrap_or_default();
                bail!("Project {} failed: {}", project.id, message);
            }
        }
        Commands::Show { id } => commands::show(config, &id).await?,
        Commands::List => commands::list(config).await?,
        Commands::Mix {
            id,
            gain_db,
            no_loudnorm,
        } => commands::mix(config, &id, gain_db, !no_loudnorm).await?,
        Commands::Normalize { id, target } => commands::normalize(config, &id, target).await?,
        Commands::Measure { id } => commands::measure(config, &id).await?,
    }
    Ok(())
}
