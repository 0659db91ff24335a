//! Cancellable status-LED blinking.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ChimeTiming;
use crate::devices::{DeviceError, StatusLed};

/// Pulse length and the gap that follows it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    pub on: Duration,
    pub off: Duration,
}

impl BlinkPattern {
    /// Fast pattern while trying to reach the hub.
    pub fn connecting(timing: &ChimeTiming) -> Self {
        Self {
            on: timing.connecting_on,
            off: timing.connecting_off,
        }
    }

    /// Slow heartbeat while online.
    pub fn online(timing: &ChimeTiming) -> Self {
        Self {
            on: timing.online_on,
            off: timing.online_off,
        }
    }
}

/// Owned handle to a running blink. Dropping it signals the task to stop;
/// [`BlinkHandle::cancel`] also waits for it.
#[derive(Debug)]
pub struct BlinkHandle {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Turn the LED off and start blinking it in the background.
pub fn start_blink(led: Arc<dyn StatusLed>, pattern: BlinkPattern) -> Result<BlinkHandle, DeviceError> {
    led.off()?;
    let token = CancellationToken::new();
    let task = tokio::spawn(blink_loop(led, pattern, token.clone()));
    debug!(on_ms = pattern.on.as_millis() as u64, off_ms = pattern.off.as_millis() as u64, "led blink started");
    Ok(BlinkHandle {
        token,
        task: Some(task),
    })
}

impl BlinkHandle {
    pub fn is_running(&self) -> bool {
        self.task.is_some()
    }

    /// Stop blinking and wait until the timer task has exited. Safe to call
    /// any number of times; returns true only for the call that stopped it.
    pub async fn cancel(&mut self) -> bool {
        let Some(task) = self.task.take() else {
            return false;
        };
        self.token.cancel();
        if let Err(e) = task.await {
            if e.is_panic() {
                warn!(error = %e, "led blink task panicked");
            }
        }
        debug!("led blink canceled");
        true
    }
}

impl Drop for BlinkHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn blink_loop(led: Arc<dyn StatusLed>, pattern: BlinkPattern, token: CancellationToken) {
    loop {
        if let Err(e) = led.on() {
            warn!(error = %e, "status led on failed");
        }
        if sleep_or_cancelled(pattern.on, &token).await {
            break;
        }
        if let Err(e) = led.off() {
            warn!(error = %e, "status led off failed");
        }
        if sleep_or_cancelled(pattern.off, &token).await {
            break;
        }
    }
    if let Err(e) = led.off() {
        warn!(error = %e, "status led off failed");
    }
}

/// True if cancelled before `duration` elapsed.
async fn sleep_or_cancelled(duration: Duration, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => true,
        _ = tokio::time::sleep(duration) => false,
    }
}
