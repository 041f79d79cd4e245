mod cli;
mod functions;
mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use durafn_api::{router, ServeHandler};
use durafn_core::SdkConfig;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();
    telemetry::init_telemetry(&args)?;

    let config = SdkConfig::from_env().context("failed to load configuration")?;
    let registry = functions::build_registry(&args.app_id)
        .context("failed to register functions")?;

    info!(
        app_id = %args.app_id,
        functions = registry.len(),
        mode = config.mode().as_str(),
        "starting durafn server"
    );

    let handler = Arc::new(ServeHandler::new(config, registry));
    let app = router(handler);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install shutdown handler: {err}");
    }
}
