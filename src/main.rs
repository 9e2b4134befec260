//! lookaside - package source synchronization
//!
//! CLI entry point that dispatches to subcommands.

use clap::Parser;
use console::style;
use lookaside::cli::{commands, Cli, Commands};
use lookaside::config::ConfigManager;
use lookaside::error::{LookasideError, LookasideResult};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> LookasideResult<()> {
    let cli = Cli::parse();

    let root = match cli.workspace {
        Some(ref dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| LookasideError::io("getting current directory", e))?,
    };

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    let local_config_path: Option<PathBuf> = if cli.no_local {
        None
    } else {
        ConfigManager::find_local_config(&root)
    };

    let config = config_manager
        .load_merged(local_config_path.as_deref())
        .await?;

    // Initialize logging: 0 = warn, 1 = info, 2+ = debug
    let filter = match cli.verbose {
        0 => EnvFilter::new("lookaside=warn"),
        1 => EnvFilter::new("lookaside=info"),
        _ => EnvFilter::new("lookaside=debug"),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);
    if config.general.log_format == "json" {
        subscriber.json().init();
    } else {
        subscriber.without_time().init();
    }

    match local_config_path {
        Some(ref path) => debug!("Merged local config: {}", path.display()),
        None if cli.no_local => debug!("Local config discovery disabled (--no-local)"),
        None => {}
    }
    debug!("Workspace: {}", root.display());

    // Dispatch to command
    match cli.command {
        Commands::Sources(args) => commands::sources(args, &config, &root).await,
        Commands::NewSources(args) => commands::new_sources(args, &config, &root).await,
        Commands::Upload(args) => commands::upload(args, &config, &root).await,
        Commands::Status(args) => commands::status(args, &config, &root).await,
        Commands::Verify => commands::verify(&config, &root).await,
        Commands::Config(args) => commands::config(args, &config, &config_manager).await,
    }
}
