use std::fs::OpenOptions;
use std::path::Path;

use fleet_plane::ControlPlane;
use fleet_plane::FleetConfig;
use fleet_plane::Result;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tracing::error;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> Result<()> {
    let config = FleetConfig::new()?.validate()?;

    // Initializing Logs
    let _guard = init_observability(&config.logging.log_dir)?;

    let plane = ControlPlane::open(config)?;
    info!("Control plane started. Waiting for shutdown signal...");

    if let Err(e) = wait_for_signal().await {
        error!("Failed to listen for shutdown signal: {:?}", e);
    }

    info!("Shutdown control plane..");
    if let Err(e) = plane.shutdown().await {
        error!("Shutdown incomplete: {:?}", e);
    }

    info!("Shutdown completed");
    Ok(())
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}

pub fn init_observability(log_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(log_dir)?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("fleet-plane.log"))?;

    let (non_blocking, guard) = tracing_appender::non_blocking(log_file);
    let base_subscriber = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::from_default_env());
    tracing_subscriber::registry().with(base_subscriber).init();

    Ok(guard)
}
