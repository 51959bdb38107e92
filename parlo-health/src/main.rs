//! Parlo health monitor (parlo-health) - Main entry point

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use parlo_common::config::TomlConfig;
use parlo_common::events::EventBus;
use parlo_health::{alert, build_router, AppState, HealthMonitor};
use tokio::signal;
use tracing::{info, warn};

/// Command-line arguments for parlo-health
#[derive(Parser, Debug)]
#[command(name = "parlo-health")]
#[command(about = "Endpoint health checks and operator alerts for Parlo")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "PARLO_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides health.listen_port)
    #[arg(short, long, env = "PARLO_HEALTH_PORT")]
    port: Option<u16>,

    /// Also sweep on this interval, in seconds, without waiting for cron
    #[arg(long)]
    check_interval: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load config")?;
    parlo_common::logging::init(&config.logging).context("Failed to initialize logging")?;

    let health = &config.health;
    let port = args.port.unwrap_or(health.listen_port);
    info!(
        port,
        endpoints = health.endpoints.len(),
        "Starting Parlo health monitor"
    );
    if health.cron_secret.is_none() {
        warn!("No cron secret configured, /api/cron/health-check will answer 503");
    }

    let events = EventBus::new(256);
    let sink = alert::sink_from_config(health).context("Failed to set up alerting")?;
    let monitor = Arc::new(
        HealthMonitor::new(health, sink, events.clone())
            .context("Failed to initialize health monitor")?,
    );

    let sweeper = args.check_interval.filter(|secs| *secs > 0).map(|secs| {
        let monitor = Arc::clone(&monitor);
        info!(interval_secs = secs, "Periodic sweeps enabled");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(secs));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.check_all().await;
            }
        })
    });

    let app = build_router(AppState::new(monitor, health.cron_secret.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("Server shutdown complete");
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
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
