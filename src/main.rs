//! ops-mesh - Main entry point
//!
//! Runs the hospital coordination mesh: discovery, the five agents, and the
//! workflow orchestrator over the in-process bus.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use ops_mesh::agents::build_mesh;
use ops_mesh::config::MeshConfig;
use ops_mesh::observability::init_default_logging;
use ops_mesh::protocol::WorkflowStartRequest;

/// Hospital operations coordination mesh
#[derive(Parser)]
#[command(name = "ops-mesh")]
#[command(about = "Agent-to-agent coordination mesh for hospital operations")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the mesh until interrupted
    Run,
    /// Run one walk-in registration workflow end to end and print the result
    Demo,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting ops-mesh v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_mesh(config).await,
        Commands::Demo => run_demo(config).await,
        Commands::Config { show } => handle_config_command(config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Shutdown complete");
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<MeshConfig, Box<dyn std::error::Error>> {
    match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(MeshConfig::load_from_file(path)?)
        }
        None => {
            let default_paths = ["mesh.toml", "config/mesh.toml"];

            for path_str in default_paths {
                let path = PathBuf::from(path_str);
                if path.exists() {
                    info!("Loading configuration from: {}", path.display());
                    return Ok(MeshConfig::load_from_file(&path)?);
                }
            }

            info!("No configuration file found; using built-in defaults");
            Ok(MeshConfig::default())
        }
    }
}

async fn run_mesh(config: MeshConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = build_mesh(config)?;

    info!("Mesh is running; press Ctrl+C to stop");

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
        }
    }

    mesh.shutdown();
    Ok(())
}

async fn run_demo(config: MeshConfig) -> Result<(), Box<dyn std::error::Error>> {
    let mesh = build_mesh(config)?;

    let workflow_id = mesh.orchestrator.start_from_request(WorkflowStartRequest {
        workflow_type: "walkin_registration".to_string(),
        initial_payload: json!({
            "first_name": "Avery",
            "last_name": "Kim",
            "queue_type": "walk_in",
            "priority": "medium",
            "reason": "persistent cough",
        }),
    })?;

    let snapshot = mesh
        .orchestrator
        .wait_until_terminal(workflow_id, Duration::from_secs(30))
        .await?;

    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&mesh.queue.statistics())?
    );

    mesh.shutdown();
    Ok(())
}

fn handle_config_command(
    config: MeshConfig,
    show: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(&config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
