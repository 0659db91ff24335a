//! Output devices driven by the chime: the bell relay and the status LED.
//!
//! Hardware drivers live outside this crate; they plug in by implementing
//! [`Relay`] and [`StatusLed`]. The `Log*` implementations are used when no
//! driver is linked (or GPIO is disabled) and only record state.

use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("{device} output failed: {reason}")]
    Output {
        device: &'static str,
        reason: String,
    },
}

/// Drives the bell. `on` rings, `off` stops; both are idempotent.
pub trait Relay: Send + Sync {
    fn on(&self) -> Result<(), DeviceError>;
    fn off(&self) -> Result<(), DeviceError>;
}

pub trait StatusLed: Send + Sync {
    fn on(&self) -> Result<(), DeviceError>;
    fn off(&self) -> Result<(), DeviceError>;
    fn is_on(&self) -> Result<bool, DeviceError>;

    fn toggle(&self) -> Result<(), DeviceError> {
        if self.is_on()? {
            self.off()
        } else {
            self.on()
        }
    }
}

/// Relay stand-in that logs state changes.
#[derive(Debug, Default)]
pub struct LogRelay {
    active: AtomicBool,
}

impl LogRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Relay for LogRelay {
    fn on(&self) -> Result<(), DeviceError> {
        self.active.store(true, Ordering::SeqCst);
        info!("relay on (no hardware)");
        Ok(())
    }

    fn off(&self) -> Result<(), DeviceError> {
        self.active.store(false, Ordering::SeqCst);
        info!("relay off (no hardware)");
        Ok(())
    }
}

/// Status LED stand-in; state changes go to debug logs.
#[derive(Debug, Default)]
pub struct LogLed {
    lit: AtomicBool,
}

impl LogLed {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusLed for LogLed {
    fn on(&self) -> Result<(), DeviceError> {
        self.lit.store(true, Ordering::SeqCst);
        debug!("status led on");
        Ok(())
    }

    fn off(&self) -> Result<(), DeviceError> {
        self.lit.store(false, Ordering::SeqCst);
        debug!("status led off");
        Ok(())
    }

    fn is_on(&self) -> Result<bool, DeviceError> {
        Ok(self.lit.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Records every relay call; `fail` makes calls error.
    #[derive(Debug, Default)]
    pub struct RecordingRelay {
        pub calls: Mutex<Vec<bool>>,
        pub fail: AtomicBool,
    }

    impl RecordingRelay {
        pub fn calls(&self) -> Vec<bool> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, on: bool) -> Result<(), DeviceError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(DeviceError::Output {
                    device: "relay",
                    reason: "injected".into(),
                });
            }
            self.calls.lock().unwrap().push(on);
            Ok(())
        }
    }

    impl Relay for RecordingRelay {
        fn on(&self) -> Result<(), DeviceError> {
            self.record(true)
        }
        fn off(&self) -> Result<(), DeviceError> {
            self.record(false)
        }
    }

    /// Counts LED writes.
    #[derive(Debug, Default)]
    pub struct CountingLed {
        pub lit: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl CountingLed {
        pub fn writes(&self) -> usize {
            self.writes.load(Ordering::SeqCst)
        }
    }

    impl StatusLed for CountingLed {
        fn on(&self) -> Result<(), DeviceError> {
            self.lit.store(true, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn off(&self) -> Result<(), DeviceError> {
            self.lit.store(false, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn is_on(&self) -> Result<bool, DeviceError> {
            Ok(self.lit.load(Ordering::SeqCst))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_led() {
        let led = LogLed::new();
        led.toggle().unwrap();
        assert!(led.is_on().unwrap());
        led.toggle().unwrap();
        assert!(!led.is_on().unwrap());
    }

    #[test]
    fn log_relay_tracks_state() {
        let relay = LogRelay::new();
        relay.on().unwrap();
        assert!(relay.is_active());
        relay.off().unwrap();
        relay.off().unwrap();
        assert!(!relay.is_active());
    }
}
