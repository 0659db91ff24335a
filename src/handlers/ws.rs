//! Doorbell notification channel: hello handshake, registration, send loop.
//!
//! Per connection: `AwaitingHello -> Registered -> (Draining) -> Closed`.
//! The first frame must be a text hello; anything else closes the socket
//! without touching the registry. Once registered the handler forwards
//! queued events as text frames until it is superseded, a write fails, or
//! the chime goes away.

use std::fmt::Display;

use axum::{
    extract::{
        ws::{Message, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tracing::{debug, info, warn};

use crate::handlers::http::AppState;
use crate::models::event::Event;
use crate::models::hello::HelloMessage;
use crate::services::{ChimeRegistry, Subscription};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    AwaitingHello,
    Registered,
    Draining,
    Closed,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Handshake failed; nothing was registered.
    Rejected,
    /// A newer connection took over the name (or the watchdog retired it).
    Superseded,
    /// Writing an event failed; the registration was removed (its snooze is kept).
    WriteFailed,
    /// The chime closed the socket; the registration was removed (its snooze is kept).
    PeerClosed,
}

/// GET /doorbell: upgrade to the chime notification channel.
pub async fn doorbell_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let registry = state.registry.clone();
    ws.on_upgrade(move |socket| async move {
        let (sender, receiver) = socket.split();
        run_session(registry, sender, receiver).await;
    })
}

/// Drive one connection to completion.
pub async fn run_session<Tx, Rx, E>(registry: ChimeRegistry, mut sender: Tx, mut receiver: Rx) -> SessionEnd
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let connection_id = registry.next_connection_id();
    let mut state = SessionState::AwaitingHello;
    debug!(connection_id, ?state, "ws connected");

    let hello = match read_hello(&mut receiver).await {
        Ok(hello) => hello,
        Err(reason) => {
            warn!(connection_id, reason = %reason, "rejecting connection");
            let _ = sender.close().await;
            debug!(connection_id, state = ?SessionState::Closed, "ws closed");
            return SessionEnd::Rejected;
        }
    };

    let subscription = registry.register(&hello.sender_name, connection_id).await;
    state = SessionState::Registered;
    info!(
        connection_id,
        chime = %subscription.name,
        replaced = subscription.replaced,
        snoozed_until = ?subscription.inherited_snooze,
        ?state,
        "chime connected"
    );

    let end = send_loop(&subscription, &mut sender, &mut receiver).await;

    if matches!(end, SessionEnd::WriteFailed | SessionEnd::PeerClosed) {
        state = SessionState::Draining;
        debug!(connection_id, ?state, "draining");
        registry
            .remove_connection(&subscription.name, connection_id)
            .await;
    }

    let _ = sender.close().await;
    state = SessionState::Closed;
    info!(connection_id, chime = %subscription.name, ?end, ?state, "chime disconnected");
    end
}

async fn read_hello<Rx, E>(receiver: &mut Rx) -> Result<HelloMessage, String>
where
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    match receiver.next().await {
        Some(Ok(Message::Text(text))) => {
            debug!(payload = %text, "hello received");
            HelloMessage::parse(&text).map_err(|e| e.to_string())
        }
        Some(Ok(other)) => Err(format!("expected text hello, got {}", frame_kind(&other))),
        Some(Err(e)) => Err(format!("read error: {}", e)),
        None => Err("connection closed before hello".to_string()),
    }
}

async fn send_loop<Tx, Rx, E>(subscription: &Subscription, sender: &mut Tx, receiver: &mut Rx) -> SessionEnd
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let queue = &subscription.queue;
    let connection_id = subscription.connection_id;
    let chime = subscription.name.as_str();

    loop {
        tokio::select! {
            delivery = queue.recv() => {
                match &delivery.event {
                    Event::StopProcessing(_) => {
                        info!(connection_id, chime = %chime, "received stop processing, exiting");
                        return SessionEnd::Superseded;
                    }
                    Event::Button(_) | Event::Snooze(_) | Event::UnSnooze(_) => {}
                }

                debug!(
                    connection_id,
                    chime = %chime,
                    event_type = %delivery.event.kind(),
                    id = %delivery.event.id(),
                    "sending event"
                );
                tokio::select! {
                    biased;
                    result = sender.send(Message::Text(delivery.payload.clone())) => {
                        if let Err(e) = result {
                            warn!(connection_id, chime = %chime, error = %e, "write failed, disconnecting");
                            return SessionEnd::WriteFailed;
                        }
                    }
                    _ = queue.retired() => {
                        info!(connection_id, chime = %chime, "retired during a stalled write");
                        return SessionEnd::Superseded;
                    }
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => return SessionEnd::PeerClosed,
                Some(Err(e)) => {
                    debug!(connection_id, chime = %chime, error = %e, "read failed");
                    return SessionEnd::PeerClosed;
                }
                Some(Ok(other)) => {
                    debug!(connection_id, chime = %chime, frame = frame_kind(&other), "ignoring inbound frame");
                }
            }
        }
    }
}

fn frame_kind(message: &Message) -> &'static str {
    match message {
        Message::Text(_) => "text",
        Message::Binary(_) => "binary",
        Message::Ping(_) => "ping",
        Message::Pong(_) => "pong",
        Message::Close(_) => "close",
    }
}
