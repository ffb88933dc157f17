use deckpilot::app::App;
use deckpilot::config::Config;
use deckpilot::messages::{RegistryEvent, TriggerTarget};

use anyhow::Result;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Starting deckpilot recorder coordinator");

    // Load configuration
    let config = Config::load()?;
    config.validate()?;

    let app = App::start(&config).await?;
    let mut events = app.subscribe_events();

    // Main event loop
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(RegistryEvent::Triggered(TriggerTarget::All)) => {
                    tracing::info!("Take triggered on all recorders");
                }
                Ok(RegistryEvent::Triggered(TriggerTarget::Recorder(id))) => {
                    tracing::info!(recorder = %id, "Take triggered");
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Main loop lagged behind {} registry events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    app.shutdown().await?;
    tracing::info!("deckpilot shutdown complete");
    Ok(())
}
