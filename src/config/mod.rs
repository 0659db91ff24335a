//! Hub and chime configuration loaded from environment.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::services::DEFAULT_QUEUE_CAPACITY;

/// Hub configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Server bind address (e.g. `0.0.0.0:8080`).
    pub server_addr: SocketAddr,
    /// Log level: `error`, `warn`, `info`, `debug`, `trace`.
    pub log_level: String,
    /// When true no GPIO button is expected and the keyboard source runs.
    pub disable_gpio: bool,
    /// Outbound queue bound per chime.
    pub queue_capacity: usize,
    /// How long a queue may stay full before its connection is retired.
    pub saturation_grace: Duration,
    pub watchdog_interval: Duration,
    /// Gap between press and release for `/button/push-release`.
    pub push_release_delay: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            disable_gpio: false,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            saturation_grace: Duration::from_secs(30),
            watchdog_interval: Duration::from_secs(5),
            push_release_delay: Duration::from_secs(1),
        }
    }
}

impl HubConfig {
    /// Load configuration from environment. Call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let defaults = Self::default();

        let server_addr = match std::env::var("SERVER_ADDR") {
            Ok(addr) => addr
                .parse()
                .map_err(|_| ConfigLoadError::InvalidServerAddr)?,
            Err(_) => defaults.server_addr,
        };
        let log_level = std::env::var("LOG_LEVEL").unwrap_or(defaults.log_level);
        let disable_gpio = env_flag("DISABLE_GPIO");

        let queue_capacity = env_parse("QUEUE_CAPACITY", defaults.queue_capacity)?;
        if queue_capacity == 0 {
            return Err(ConfigLoadError::InvalidNumber("QUEUE_CAPACITY"));
        }
        let saturation_grace = env_parse("SATURATION_GRACE_SECS", 30u64).map(Duration::from_secs)?;
        let watchdog_interval = env_parse("WATCHDOG_INTERVAL_SECS", 5u64).map(Duration::from_secs)?;
        if watchdog_interval.is_zero() {
            return Err(ConfigLoadError::InvalidNumber("WATCHDOG_INTERVAL_SECS"));
        }
        let push_release_delay =
            env_parse("PUSH_RELEASE_DELAY_MS", 1000u64).map(Duration::from_millis)?;

        Ok(Self {
            server_addr,
            log_level,
            disable_gpio,
            queue_capacity,
            saturation_grace,
            watchdog_interval,
            push_release_delay,
        })
    }
}

/// Chime client configuration loaded from `.env` and environment variables.
#[derive(Debug, Clone)]
pub struct ChimeConfig {
    /// Hub `host:port`; the client dials `ws://<hub_addr>/doorbell`.
    pub hub_addr: String,
    /// Name announced in the hello handshake.
    pub chime_name: String,
    pub log_level: String,
    pub disable_gpio: bool,
    pub timing: ChimeTiming,
}

impl ChimeConfig {
    pub fn new(hub_addr: impl Into<String>, chime_name: impl Into<String>) -> Self {
        Self {
            hub_addr: hub_addr.into(),
            chime_name: chime_name.into(),
            log_level: "info".to_string(),
            disable_gpio: false,
            timing: ChimeTiming::default(),
        }
    }

    /// Load configuration from environment. `CHIME_NAME` falls back to the hostname.
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        let hub_addr = std::env::var("HUB_ADDR").unwrap_or_else(|_| "localhost:8080".to_string());
        if hub_addr.trim().is_empty() || hub_addr.contains('/') {
            return Err(ConfigLoadError::InvalidHubAddr(hub_addr));
        }
        let chime_name = match std::env::var("CHIME_NAME") {
            Ok(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => hostname()?,
        };
        let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            hub_addr,
            chime_name,
            log_level,
            disable_gpio: env_flag("DISABLE_GPIO"),
            timing: ChimeTiming::default(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("ws://{}/doorbell", self.hub_addr)
    }
}

/// Timers driving the chime client's status LED and reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChimeTiming {
    pub dial_timeout: Duration,
    /// Connecting pattern: short pulse, short wait.
    pub connecting_on: Duration,
    pub connecting_off: Duration,
    /// Online heartbeat: short pulse, long wait.
    pub online_on: Duration,
    pub online_off: Duration,
    pub backoff_interval: Duration,
    pub backoff_toggles: u32,
}

impl Default for ChimeTiming {
    fn default() -> Self {
        Self {
            dial_timeout: Duration::from_secs(10),
            connecting_on: Duration::from_millis(100),
            connecting_off: Duration::from_secs(1),
            online_on: Duration::from_millis(100),
            online_off: Duration::from_secs(10),
            backoff_interval: Duration::from_millis(500),
            backoff_toggles: 10,
        }
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn env_parse<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigLoadError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidNumber(key)),
        Err(_) => Ok(default),
    }
}

fn hostname() -> Result<String, ConfigLoadError> {
    if let Ok(name) = std::env::var("HOSTNAME") {
        if !name.trim().is_empty() {
            return Ok(name.trim().to_string());
        }
    }
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or(ConfigLoadError::MissingChimeName)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
    #[error("Invalid SERVER_ADDR")]
    InvalidServerAddr,
    #[error("Invalid HUB_ADDR {0:?}, expected host:port")]
    InvalidHubAddr(String),
    #[error("Invalid value for {0}")]
    InvalidNumber(&'static str),
    #[error("CHIME_NAME is unset and the hostname could not be determined")]
    MissingChimeName,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chime_endpoint_uses_doorbell_path() {
        let config = ChimeConfig::new("hub.local:8080", "porch");
        assert_eq!(config.endpoint(), "ws://hub.local:8080/doorbell");
    }

    #[test]
    fn default_timing_matches_status_patterns() {
        let timing = ChimeTiming::default();
        assert_eq!(timing.dial_timeout, Duration::from_secs(10));
        assert!(timing.online_off > timing.connecting_off);
        assert_eq!(timing.backoff_interval * timing.backoff_toggles, Duration::from_secs(5));
    }

    #[test]
    fn hub_defaults() {
        let config = HubConfig::default();
        assert_eq!(config.queue_capacity, 50);
        assert_eq!(config.server_addr.port(), 8080);
    }
}
