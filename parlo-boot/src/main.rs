//! Parlo bootstrap (parlo-boot) - Main entry point
//!
//! Runs the startup sequence headless: the root decisions that a UI would
//! present are logged instead.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use parlo_boot::{BootApp, BootstrapOutcome};
use parlo_common::config::TomlConfig;
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for parlo-boot
#[derive(Parser, Debug)]
#[command(name = "parlo-boot")]
#[command(about = "Connectivity-gated startup for the Parlo client")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "PARLO_CONFIG")]
    config: Option<PathBuf>,

    /// Exit after the first terminal decision instead of waiting for Ctrl+C
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;
    parlo_common::logging::init(&config.logging).context("Failed to initialize logging")?;

    info!(backend = %config.backend.base_url, "Starting Parlo bootstrap");

    let (app, mut decisions) =
        BootApp::from_config(&config).context("Failed to build bootstrap stack")?;

    // Stand-in for the UI task: owns the decision receiver
    let ui = tokio::spawn(async move {
        while let Some(decision) = decisions.recv().await {
            info!(decision = %decision, "Root view");
        }
    });

    let mut bus_rx = app.events.subscribe();
    let event_log = tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            tracing::debug!(event_type = event.event_type(), "Event");
        }
    });

    app.monitor.start_monitoring();
    let mut run = app.coordinator.start();

    tokio::select! {
        outcome = &mut run => {
            match outcome.context("Bootstrap task failed")? {
                BootstrapOutcome::Decided(decision) => info!(decision = %decision, "Startup decided"),
                other => warn!(outcome = ?other, "Bootstrap ended without a decision"),
            }
            if !args.once {
                shutdown_signal().await;
            }
        }
        _ = shutdown_signal() => {}
    }

    app.shutdown();
    event_log.abort();
    ui.abort();

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
