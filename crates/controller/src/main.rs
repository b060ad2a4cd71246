//! Adaptive controller - energy-aware model switching and retraining
//!
//! Runs alongside an inference service, watching its prediction log and
//! steering which model family and version it serves.

use adapt_controller::{api, config::ControllerConfig, runtime::Controller};
use anyhow::Result;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CONTROLLER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting adapt-controller");

    let config = ControllerConfig::load()?;
    info!(
        instance = %config.instance,
        run_mode = %config.run_mode,
        simulate = config.simulate,
        "Controller configured"
    );

    let controller = Controller::build(config).await?;
    let active = controller.active_model().await?;
    let logger = controller.logger().clone();
    logger.log_startup(
        CONTROLLER_VERSION,
        controller.config().run_mode.as_str(),
        active.family,
    );

    let app_state = controller.app_state();
    let api_port = controller.config().api_port;
    let health_registry = controller.health().clone();

    let (shutdown_tx, _) = broadcast::channel(1);
    // Readiness opens once the scheduler's cycles have each run
    let controller_handle = tokio::spawn(controller.run(shutdown_tx.clone()));

    // Start health, metrics and state server
    let api_handle = tokio::spawn(api::serve(api_port, app_state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    logger.log_shutdown("SIGINT received");
    health_registry.mark_stopping().await;
    let _ = shutdown_tx.send(());

    match controller_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %format!("{e:#}"), "Controller stopped with error"),
        Err(e) => error!(error = %e, "Controller task panicked"),
    }
    api_handle.abort();

    info!("Shutdown complete");
    Ok(())
}
