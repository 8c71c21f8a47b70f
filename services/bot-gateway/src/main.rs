//! Bot gateway entry point
//!
//! Wiring order: runtime driver (probe + best-effort image build), broker
//! connection with bounded retry, command router, then the thin HTTP
//! collaborator surface.

use std::sync::Arc;

use tracing::{info, warn, Level};

use bot_gateway::config::GatewaySettings;
use bot_gateway::http::{self, AppState};
use bot_gateway::lifecycle::LifecycleManager;
use bot_gateway::router::CommandRouter;
use bot_gateway::runtime::{DockerDriver, RuntimeDriver};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    info!("Starting bot gateway...");
    let settings = GatewaySettings::from_env();

    let driver = DockerDriver::connect(
        settings.worker_image.clone(),
        settings.image_build_context.clone(),
    )
    .await?;

    // Image build failures are reported per-worker on later starts instead
    // of aborting initialization.
    if driver.ping().await.is_ok() {
        if let Err(e) = driver.build_image().await {
            warn!("Worker image build failed: {}", e);
        }
    }

    let runtime: Arc<dyn RuntimeDriver> = Arc::new(driver);
    let lifecycle = Arc::new(LifecycleManager::new(runtime, settings.clone()));

    let (_publisher, transport) = CommandRouter::start(&settings.mqtt, lifecycle.clone()).await;

    let state = Arc::new(AppState {
        lifecycle,
        transport,
    });
    let app = http::app(state);

    let listener =
        tokio::net::TcpListener::bind(format!("0.0.0.0:{}", settings.http_port)).await?;
    info!("Gateway listening on port {}", settings.http_port);
    axum::serve(listener, app).await?;

    Ok(())
}
