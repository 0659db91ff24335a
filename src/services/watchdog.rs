//! Periodic sweep that retires chimes whose queue stayed full too long.

use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::services::registry::ChimeRegistry;

/// Spawn the saturation watchdog. It stops when `shutdown` is cancelled.
pub fn spawn_watchdog(
    registry: ChimeRegistry,
    interval: Duration,
    grace: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_ms = interval.as_millis() as u64,
            grace_ms = grace.as_millis() as u64,
            "saturation watchdog started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let retired = registry.retire_saturated(grace, Instant::now()).await;
                    if !retired.is_empty() {
                        info!(chimes = ?retired, "watchdog retired saturated chimes");
                    }
                }
            }
        }
        debug!("saturation watchdog stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::event::{ButtonEventType, Event};

    #[tokio::test]
    async fn retires_stuck_chime_and_stops_on_shutdown() {
        let registry = ChimeRegistry::new(1);
        let stuck = registry.register("stuck", 1).await;
        for _ in 0..2 {
            let _ = registry
                .send_to("stuck", Event::button(ButtonEventType::Pressed, "web"))
                .await;
        }

        let shutdown = CancellationToken::new();
        let handle = spawn_watchdog(
            registry.clone(),
            Duration::from_millis(10),
            Duration::from_millis(20),
            shutdown.clone(),
        );

        tokio::time::timeout(Duration::from_secs(2), stuck.queue.retired())
            .await
            .expect("watchdog should retire the stuck queue");
        assert!(registry.is_empty().await);

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("watchdog should stop")
            .unwrap();
    }
}
