//! Chime client: keeps a websocket to the hub alive and rings the relay.
//!
//! ```text
//! Connecting(n) --dial ok--> Connected --connection lost--> Backoff(1)
//!      |                                                       |
//!      +--dial failed--> Backoff(n) --10 toggles--> Connecting(n+1)
//! any state --shutdown--> Terminated
//! ```
//!
//! While connecting the status LED blinks fast; once online it switches to
//! a slow heartbeat; during backoff it toggles every interval. Retries are
//! unbounded, only shutdown ends the loop.

use std::sync::Arc;

use chrono::Utc;
use futures::{SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{oneshot, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::chime::blink::{start_blink, BlinkHandle, BlinkPattern};
use crate::chime::dispatch::Dispatcher;
use crate::config::ChimeConfig;
use crate::devices::{DeviceError, Relay, StatusLed};
use crate::models::hello::HelloMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("dial to {url} failed: {source}")]
    Dial {
        url: String,
        #[source]
        source: tungstenite::Error,
    },

    #[error("dial to {url} timed out after {timeout_ms} ms")]
    DialTimeout { url: String, timeout_ms: u64 },

    #[error("websocket error: {0}")]
    Socket(#[from] tungstenite::Error),

    #[error("connection closed by hub")]
    Closed,

    #[error("failed to encode hello: {0}")]
    Handshake(#[from] serde_json::Error),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Observable client state.
///
/// `attempt` counts dials since the last successful connection. A failed
/// dial keeps its number into `Backoff`, so `Backoff { attempt: n }` follows
/// `Connecting { attempt: n }`; only a dropped live connection restarts the
/// count at `Backoff { attempt: 1 }`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Connecting { attempt: u64 },
    Connected,
    Backoff { attempt: u64 },
    Terminated,
}

enum Phase {
    Connecting { attempt: u64 },
    Connected { stream: Box<WsStream> },
    Backoff { attempt: u64 },
    Terminated,
}

impl Phase {
    fn state(&self) -> ClientState {
        match self {
            Phase::Connecting { attempt } => ClientState::Connecting { attempt: *attempt },
            Phase::Connected { .. } => ClientState::Connected,
            Phase::Backoff { attempt } => ClientState::Backoff { attempt: *attempt },
            Phase::Terminated => ClientState::Terminated,
        }
    }
}

pub struct ChimeClient {
    config: ChimeConfig,
    relay: Arc<dyn Relay>,
    led: Arc<dyn StatusLed>,
    shutdown: CancellationToken,
    state_tx: watch::Sender<ClientState>,
}

impl ChimeClient {
    pub fn new(
        config: ChimeConfig,
        relay: Arc<dyn Relay>,
        led: Arc<dyn StatusLed>,
        shutdown: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ClientState::Connecting { attempt: 1 });
        Self {
            config,
            relay,
            led,
            shutdown,
            state_tx,
        }
    }

    /// Follow state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ClientState> {
        self.state_tx.subscribe()
    }

    /// Run until shutdown. Only a relay that cannot be switched off at
    /// start-up is an error; everything else is retried.
    pub async fn run(&self) -> Result<(), ClientError> {
        info!(chime = %self.config.chime_name, hub = %self.config.endpoint(), "chime starting");
        self.relay.off()?;

        let mut phase = Phase::Connecting { attempt: 1 };
        loop {
            let state = phase.state();
            self.state_tx.send_replace(state);
            debug!(?state, "state");

            phase = match phase {
                Phase::Connecting { attempt } => self.connecting(attempt).await,
                Phase::Connected { stream } => self.connected(*stream).await,
                Phase::Backoff { attempt } => self.backoff(attempt).await,
                Phase::Terminated => break,
            };
        }

        if let Err(e) = self.relay.off() {
            warn!(error = %e, "failed to switch relay off on exit");
        }
        if let Err(e) = self.led.off() {
            warn!(error = %e, "failed to switch status led off on exit");
        }
        info!("chime stopped");
        Ok(())
    }

    fn blink(&self, pattern: BlinkPattern) -> Option<BlinkHandle> {
        match start_blink(self.led.clone(), pattern) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "failed to start status led blink");
                None
            }
        }
    }

    async fn connecting(&self, attempt: u64) -> Phase {
        let mut blink = self.blink(BlinkPattern::connecting(&self.config.timing));
        let result = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = dial(&self.config) => Some(result),
        };
        if let Some(blink) = blink.as_mut() {
            blink.cancel().await;
        }

        match result {
            None => Phase::Terminated,
            Some(Ok(stream)) => {
                info!(attempt, chime = %self.config.chime_name, "connected to hub");
                Phase::Connected {
                    stream: Box::new(stream),
                }
            }
            Some(Err(e)) => {
                error!(attempt, error = %e, "failed to connect");
                Phase::Backoff { attempt }
            }
        }
    }

    async fn connected(&self, stream: WsStream) -> Phase {
        let mut blink = self.blink(BlinkPattern::online(&self.config.timing));
        let (mut write, read) = stream.split();
        let (result_tx, result_rx) = oneshot::channel();
        let reader = tokio::spawn(read_loop(read, Dispatcher::new(self.relay.clone()), result_tx));
        info!("listening");

        let outcome = tokio::select! {
            _ = self.shutdown.cancelled() => None,
            result = result_rx => Some(result.unwrap_or(ClientError::Closed)),
        };

        // Stop the blink before anything else.
        if let Some(blink) = blink.as_mut() {
            blink.cancel().await;
        }
        reader.abort();
        let _ = reader.await;

        match outcome {
            None => {
                info!("interrupted, closing connection");
                let _ = write.close().await;
                Phase::Terminated
            }
            Some(e) => {
                error!(error = %e, "connection lost");
                Phase::Backoff { attempt: 1 }
            }
        }
    }

    async fn backoff(&self, attempt: u64) -> Phase {
        let timing = &self.config.timing;
        info!(
            attempt,
            wait_ms = (timing.backoff_interval * timing.backoff_toggles).as_millis() as u64,
            "backing off before reconnecting"
        );
        for _ in 0..timing.backoff_toggles {
            if let Err(e) = self.led.toggle() {
                warn!(error = %e, "status led toggle failed");
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Phase::Terminated,
                _ = tokio::time::sleep(timing.backoff_interval) => {}
            }
        }
        Phase::Connecting {
            attempt: attempt.saturating_add(1),
        }
    }
}

/// Dial the hub (bounded by the dial timeout) and send the hello.
pub(crate) async fn dial(config: &ChimeConfig) -> Result<WsStream, ClientError> {
    let url = config.endpoint();
    info!(url = %url, "connecting");
    let timeout = config.timing.dial_timeout;
    let (mut stream, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
        .await
        .map_err(|_| ClientError::DialTimeout {
            url: url.clone(),
            timeout_ms: timeout.as_millis() as u64,
        })?
        .map_err(|source| ClientError::Dial {
            url: url.clone(),
            source,
        })?;

    let hello = serde_json::to_string(&HelloMessage::new(config.chime_name.clone()))?;
    debug!(payload = %hello, "sending hello");
    stream.send(Message::Text(hello)).await?;
    Ok(stream)
}

/// Connection-level failures end the connection; anything else is retried.
fn is_connection_error(err: &tungstenite::Error) -> bool {
    matches!(
        err,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Io(_)
            | tungstenite::Error::Protocol(_)
    )
}

async fn read_loop<S>(mut read: S, mut dispatcher: Dispatcher, result_tx: oneshot::Sender<ClientError>)
where
    S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    let err = loop {
        match read.next().await {
            Some(Ok(Message::Text(text))) => {
                debug!(payload = %text, "received");
                if let Err(e) = dispatcher.handle_frame(&text, Utc::now()) {
                    break ClientError::Device(e);
                }
            }
            Some(Ok(Message::Close(frame))) => {
                info!(?frame, "hub closed the connection");
                break ClientError::Closed;
            }
            Some(Ok(other)) => debug!(len = other.len(), "ignoring non-text frame"),
            Some(Err(e)) if is_connection_error(&e) => break ClientError::Socket(e),
            Some(Err(e)) => warn!(error = %e, "read error, continuing"),
            None => break ClientError::Closed,
        }
    };
    let _ = result_tx.send(err);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChimeTiming;
    use crate::devices::testing::{CountingLed, RecordingRelay};
    use crate::models::event::{ButtonEventType, Event};
    use futures::stream;
    use std::time::Duration;

    fn quick_timing() -> ChimeTiming {
        ChimeTiming {
            dial_timeout: Duration::from_millis(200),
            connecting_on: Duration::from_millis(5),
            connecting_off: Duration::from_millis(5),
            online_on: Duration::from_millis(5),
            online_off: Duration::from_millis(50),
            backoff_interval: Duration::from_millis(5),
            backoff_toggles: 3,
        }
    }

    async fn unused_addr() -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        addr.to_string()
    }

    async fn wait_until(rx: &mut watch::Receiver<ClientState>, pred: impl FnMut(&ClientState) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), rx.wait_for(pred))
            .await
            .expect("state never reached")
            .unwrap();
    }

    #[tokio::test]
    async fn retries_forever_until_shutdown() {
        let mut config = ChimeConfig::new(unused_addr().await, "porch");
        config.timing = quick_timing();
        let relay = Arc::new(RecordingRelay::default());
        let led = Arc::new(CountingLed::default());
        let shutdown = CancellationToken::new();
        let client = Arc::new(ChimeClient::new(config, relay.clone(), led.clone(), shutdown.clone()));
        let mut states = client.subscribe_state();

        let runner = tokio::spawn({
            let client = client.clone();
            async move { client.run().await }
        });

        wait_until(&mut states, |s| {
            matches!(s, ClientState::Connecting { attempt } | ClientState::Backoff { attempt } if *attempt >= 3)
        })
        .await;
        assert!(led.writes() > 0);

        shutdown.cancel();
        runner.await.unwrap().unwrap();
        assert_eq!(*states.borrow(), ClientState::Terminated);
        assert!(relay.calls().iter().all(|on| !on));
    }

    #[tokio::test]
    async fn dial_times_out_on_silent_server() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _silent = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let mut config = ChimeConfig::new(addr.to_string(), "porch");
        config.timing = quick_timing();
        assert!(matches!(
            dial(&config).await,
            Err(ClientError::DialTimeout { .. })
        ));
    }

    #[tokio::test]
    async fn read_loop_dispatches_until_close() {
        let relay = Arc::new(RecordingRelay::default());
        let frames = vec![
            Ok(Message::Text(Event::button(ButtonEventType::Pressed, "web").to_json().unwrap())),
            Err(tungstenite::Error::Utf8),
            Ok(Message::Binary(vec![1, 2, 3])),
            Ok(Message::Text(Event::button(ButtonEventType::Released, "web").to_json().unwrap())),
            Ok(Message::Close(None)),
            Ok(Message::Text(Event::button(ButtonEventType::Pressed, "web").to_json().unwrap())),
        ];
        let (tx, rx) = oneshot::channel();
        read_loop(stream::iter(frames), Dispatcher::new(relay.clone()), tx).await;
        assert!(matches!(rx.await.unwrap(), ClientError::Closed));
        assert_eq!(relay.calls(), vec![true, false]);
    }

    #[tokio::test]
    async fn read_loop_stops_on_connection_error() {
        let relay = Arc::new(RecordingRelay::default());
        let frames = vec![Err(tungstenite::Error::ConnectionClosed)];
        let (tx, rx) = oneshot::channel();
        read_loop(stream::iter(frames), Dispatcher::new(relay), tx).await;
        assert!(matches!(
            rx.await.unwrap(),
            ClientError::Socket(tungstenite::Error::ConnectionClosed)
        ));
    }

    #[test]
    fn classifies_errors() {
        assert!(is_connection_error(&tungstenite::Error::ConnectionClosed));
        assert!(is_connection_error(&tungstenite::Error::AlreadyClosed));
        assert!(is_connection_error(&tungstenite::Error::Io(std::io::Error::from(
            std::io::ErrorKind::ConnectionReset
        ))));
        assert!(!is_connection_error(&tungstenite::Error::Utf8));
    }
}
