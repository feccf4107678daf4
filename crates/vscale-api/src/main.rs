//! Transcode server binary.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vscale_api::{create_router, metrics, shutdown_signal, AppState, ServerConfig, Supervisor};
use vscale_media::check_ffmpeg;

/// On-demand video resolution server.
#[derive(Debug, Parser)]
#[command(name = "vscale-api", version, about)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(long, short, default_value = "config.json")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vscale=info"));

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    let args = Args::parse();

    if let Err(e) = run(args).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting vscale-api");

    // Fail closed: nothing is bound until the config is known good.
    let config = ServerConfig::load(&args.config)
        .and_then(ServerConfig::with_env_overrides)
        .with_context(|| format!("Invalid config file {}", args.config.display()))?;
    config.validate().context("Invalid config")?;

    info!(
        host = %config.host,
        port = config.port,
        input_dir = %config.input_dir.display(),
        output_dir = %config.output_dir.display(),
        widths = ?config.widths,
        "Config loaded"
    );

    match check_ffmpeg(&config.encoder.program) {
        Ok(path) => info!("Using encoder at {}", path.display()),
        Err(e) => warn!("{}; transcodes will fail until it is installed", e),
    }

    let metrics_enabled = std::env::var("METRICS_ENABLED")
        .map(|v| v != "false" && v != "0")
        .unwrap_or(true);

    let metrics_handle = if metrics_enabled {
        info!("Prometheus metrics enabled at /metrics");
        Some(metrics::init_metrics().context("Failed to install Prometheus recorder")?)
    } else {
        None
    };

    let state = AppState::new(config);
    let supervisor = Supervisor::bind(&state).await?;
    let app = create_router(state, metrics_handle);

    let report = supervisor
        .run_until_shutdown(app, shutdown_signal())
        .await
        .drain()
        .await;

    if report.forced {
        warn!("Server stopped after cancelling in-flight transcodes");
    } else {
        info!("Server gracefully stopped");
    }
    Ok(())
}
