//! facetrack - Face Tracking Service
//!
//! Main entry point: loads configuration, starts the controller, and runs
//! until interrupted.

use facetrack::admin::AdminAdapter;
use facetrack::capture::FfmpegBackend;
use facetrack::config::ConfigSource;
use facetrack::controller::FtsController;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "facetrack=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting facetrack v{}", env!("CARGO_PKG_VERSION"));

    match FfmpegBackend::check().await {
        Ok(version) => tracing::info!(ffmpeg = %version, "Capture backend available"),
        Err(e) => tracing::warn!(error = %e, "ffmpeg not found; capture will fail"),
    }

    // Load configuration: file from FTS_CONFIG, env overrides on top
    let config_source = match std::env::var("FTS_CONFIG") {
        Ok(path) => {
            let source = ConfigSource::load(&path).await?;
            // Env still wins over file values
            let mut config = source.snapshot().await;
            config.apply_env_overrides();
            source.apply(config).await?;
            Arc::new(source)
        }
        Err(_) => Arc::new(ConfigSource::from_env()?),
    };

    let controller = FtsController::new(config_source);
    let admin = AdminAdapter::new(controller.clone());

    let started = admin.start().await;
    if !started.success {
        anyhow::bail!("start failed: {}", started.message);
    }
    tracing::info!(message = %started.message, "Service running");

    // Periodic status heartbeat
    {
        let admin_controller = controller.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(30));
            loop {
                interval.tick().await;
                let status = admin_controller.status().await;
                tracing::info!(
                    running = status.running,
                    uptime_s = status.uptime_s,
                    cameras = status.cameras.len(),
                    identities = status.identities,
                    cpu_percent = status.cpu_percent,
                    memory_percent = status.memory_percent,
                    "Status heartbeat"
                );
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received; shutting down");

    let stopped = admin.stop().await;
    tracing::info!(message = %stopped.message, "Shutdown complete");

    Ok(())
}
