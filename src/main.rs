/*!
 * Lattice CLI - Command Line Interface
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use anyhow::Context;
use clap::{Parser, Subcommand};
use lattice::{
    config::{spawn_watcher, Config, ControllerSettings},
    error::{ControllerError, EXIT_FAILURE, EXIT_SUCCESS},
    logging, Controller,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

#[derive(Parser)]
#[command(name = "lattice")]
#[command(version, about = "Control plane for network topology emulation", long_about = None)]
struct Cli {
    /// Configuration file (default: standard locations)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured compute engines
    Computes,

    /// Ask a compute engine for its version
    Probe {
        /// Identifier of the engine (`[compute.<id>]` section)
        compute_id: String,
    },

    /// Run the controller until interrupted
    Run,
}

#[tokio::main]
async fn main() {
    let code = match run().await {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            e.downcast_ref::<ControllerError>()
                .map(ControllerError::exit_code)
                .unwrap_or(EXIT_FAILURE)
        }
    };
    std::process::exit(code);
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match cli.config {
        Some(ref path) => Config::from_files(vec![path.clone()])
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => Config::load()?,
    };
    let mut settings = ControllerSettings::from_config(&config)?;
    settings.logging.verbose |= cli.debug;

    if let Err(e) = logging::init_logging(&settings.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }
    info!("Lattice {} starting", lattice::VERSION);
    for file in config.loaded_files() {
        info!("Loaded configuration from {}", file.display());
    }

    let reload_interval = settings.reload_interval;
    let controller = Controller::new(settings).await?;

    match cli.command {
        Commands::Computes => {
            for record in controller.computes().list_computes().await {
                println!(
                    "{:<16} {:<32} {}",
                    record.id,
                    record.base_url(),
                    record.name.as_deref().unwrap_or("-")
                );
            }
        }
        Commands::Probe { compute_id } => {
            let version = controller
                .probe(&compute_id)
                .await
                .with_context(|| format!("Compute {} did not answer", compute_id))?;
            println!("{}", serde_json::to_string_pretty(&version)?);
        }
        Commands::Run => {
            let controller = Arc::new(controller);
            let config = Arc::new(RwLock::new(config));
            let (watcher, reloads) = spawn_watcher(config.clone(), reload_interval);
            let follower = controller.clone().follow_config(config, reloads);

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Shutting down");

            watcher.abort();
            follower.abort();
            controller.shutdown().await?;
        }
    }

    Ok(())
}
