//! Remote Protocol Bridge Service
//!
//! Loads an engine configuration, runs the processing engine and stops it
//! again on Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use rpb_bridge::{ProcessingEngine, TracingLogTarget};
use rpb_core::EngineConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rpb-service")]
#[command(about = "Remote Protocol Bridge Service")]
#[command(version)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the default configuration to this file and exit
    #[arg(long, value_name = "FILE")]
    write_default: Option<PathBuf>,

    /// Log every bridged message
    #[arg(short, long)]
    log_traffic: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Some(path) = cli.write_default {
        EngineConfig::with_default_node()
            .write_file(&path)
            .with_context(|| format!("writing {}", path.display()))?;
        tracing::info!("Default configuration written to {}", path.display());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => {
            tracing::info!("No configuration given, using the default node");
            EngineConfig::with_default_node()
        }
    };

    let log_traffic = cli.log_traffic || config.traffic_logging_allowed;
    let mut engine = ProcessingEngine::new(config);
    if log_traffic {
        engine.set_logging_target(Some(Arc::new(TracingLogTarget)));
        engine.set_logging_enabled(true);
    }

    tracing::info!("Starting processing engine");
    if let Err(e) = engine.start().await {
        tracing::error!("Engine started with errors: {}", e);
    }
    tracing::info!("Running {} nodes, press Ctrl-C to stop", engine.node_ids().len());

    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutting down");
    engine.stop().await;
    Ok(())
}
