//! Chime entry point: connect to the hub and ring the relay on button events.

use std::sync::Arc;

use bellpush::chime::ChimeClient;
use bellpush::config::ChimeConfig;
use bellpush::devices::{LogLed, LogRelay, Relay, StatusLed};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = ChimeConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    if !config.disable_gpio {
        tracing::warn!("no gpio relay driver linked, relay and led changes are only logged");
    }
    let relay: Arc<dyn Relay> = Arc::new(LogRelay::new());
    let led: Arc<dyn StatusLed> = Arc::new(LogLed::new());

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("interrupt received");
            shutdown.cancel();
        }
    });

    let client = ChimeClient::new(config, relay, led, shutdown);
    client.run().await?;
    Ok(())
}
