//! Capture Service for Vigil Site Monitoring
//!
//! This service reads per-camera detections and frames from the perception
//! pipeline, writes structured alert records, and captures clips and snapshot
//! bursts around every alert event.
//!
//! # Architecture
//!
//! ```text
//! Perception pipeline -> JsonLinesSource -> Supervisor -> camera workers
//!                                                 |-> AlertLog
//!                                                 \-> RollingCaptureBuffer -> JPEG/MJPEG
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from:
//! 1. Configuration files (config/default.toml, config/{env}.toml)
//! 2. Environment variables (prefixed with VIGIL_)
//!
//! See `config.rs` for detailed configuration options.

use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vigil_capture::config::{CaptureServiceConfig, LoggingConfig};
use vigil_capture::ingest::open_source;
use vigil_capture::{JpegEncoderFactory, StopReason, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = load_config()?;

    // Initialize logging
    init_logging(&config.logging)?;

    info!(
        service = "vigil-capture",
        version = env!("CARGO_PKG_VERSION"),
        site_id = %config.site.site_id,
        device_id = %config.device_id(),
        cameras = config.cameras.len(),
        "Starting capture service"
    );

    // Validate configuration and output locations
    config.validate()?;
    config.prepare_output_paths()?;

    let encoder = Arc::new(JpegEncoderFactory::new(config.capture.jpeg_quality));
    let supervisor = Supervisor::new(&config, encoder)?;
    let source = open_source(&config.input, supervisor.cameras().clone()).await?;

    // Wait for shutdown signal
    let shutdown_signal = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    let summary = supervisor.run(source, shutdown_signal).await;

    match check_stop_reason(&summary.reason) {
        Ok(()) => {
            info!("Capture service completed successfully");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Capture service failed");
            Err(e)
        }
    }
}

/// Load configuration.
fn load_config() -> anyhow::Result<CaptureServiceConfig> {
    // Try loading from files first, fall back to environment
    let config = CaptureServiceConfig::load().or_else(|e| {
        warn!(error = %e, "Failed to load config from files, trying environment");
        CaptureServiceConfig::from_env()
    })?;

    Ok(config)
}

/// Initialize the tracing/logging subsystem.
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = match config.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(format!("vigil_capture={}", level).parse()?);

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.format == "json" {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber.with(fmt::layer().pretty()).init();
    }

    Ok(())
}

/// Map how the run ended to the process outcome.
fn check_stop_reason(reason: &StopReason) -> anyhow::Result<()> {
    match reason {
        StopReason::Signal | StopReason::EndOfStream | StopReason::InputClosed => Ok(()),
        StopReason::PipelineFailed(message) => {
            anyhow::bail!("perception pipeline failed: {}", message)
        }
        StopReason::InputFailed(message) => anyhow::bail!("input failed: {}", message),
    }
}
