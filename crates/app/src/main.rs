use clap::Parser;
use sparkbox_app::gpio::InputArbiter;
use sparkbox_app::http;
use sparkbox_app::supervisor::StationSupervisor;
use sparkbox_foundation::{AppConfig, ShutdownHandler};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sparkbox", about = "Sketch-to-maker-plan kiosk station")]
struct Args {
    /// Path to the station configuration file
    #[arg(short, long, default_value = "config/sparkbox.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = AppConfig::load(&args.config).map_err(|e| {
        tracing::error!("Configuration error: {}", e);
        anyhow::anyhow!(e)
    })?;

    let shutdown = ShutdownHandler::new().install();

    let supervisor = StationSupervisor::start(config, shutdown.clone())
        .await
        .map_err(|e| {
            tracing::error!("Startup failed: {}", e);
            anyhow::anyhow!(e)
        })?;

    // GPIO is optional: a workstation without the lines still runs with
    // the browser controls.
    let arbiter = InputArbiter::open(&supervisor.config().io);
    if arbiter.has_buttons() {
        arbiter.spawn(supervisor.clone(), supervisor.bus().clone());
    } else {
        tracing::warn!("No GPIO buttons available; browser controls only");
    }

    let addr = format!(
        "{}:{}",
        supervisor.config().server.host,
        supervisor.config().server.port
    );
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "Web interface listening");

    let app = http::router(supervisor.clone());
    let serve_shutdown = Arc::clone(&shutdown);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_shutdown.wait().await })
        .await?;

    supervisor.shutdown().await;
    Ok(())
}
