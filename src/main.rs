//! Hub entry point: load config, start the registry and event sources, and
//! serve the doorbell channel.

use bellpush::config::HubConfig;
use bellpush::services::{spawn_watchdog, ChimeRegistry};
use bellpush::sources::spawn_keyboard_source;
use bellpush::{create_app, AppState};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = HubConfig::from_env().map_err(|e| anyhow::anyhow!("config: {}", e))?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let shutdown = CancellationToken::new();
    let registry = ChimeRegistry::new(config.queue_capacity);
    let watchdog = spawn_watchdog(
        registry.clone(),
        config.watchdog_interval,
        config.saturation_grace,
        shutdown.clone(),
    );

    let keyboard = if config.disable_gpio {
        tracing::info!("gpio disabled, press 'b' then enter to ring and 'r' to release");
        Some(spawn_keyboard_source(registry.clone(), shutdown.clone()))
    } else {
        tracing::warn!("no gpio button driver linked; use the http triggers or DISABLE_GPIO=true");
        None
    };

    let state = AppState::new(registry).with_push_release_delay(config.push_release_delay);
    let app = create_app(state);

    tracing::info!(addr = %config.server_addr, "listening");
    let listener = tokio::net::TcpListener::bind(config.server_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
                tracing::info!("shutting down");
                shutdown.cancel();
            }
        })
        .await?;

    shutdown.cancel();
    watchdog.await?;
    if let Some(keyboard) = keyboard {
        let sent = keyboard.await?;
        tracing::debug!(sent, "keyboard source finished");
    }
    tracing::info!("stopped");
    Ok(())
}
