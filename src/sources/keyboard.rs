//! Keyboard bell simulator: `b` presses the button, `r` releases it.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::models::event::{ButtonEventType, Event};
use crate::services::ChimeRegistry;

pub const SOURCE_KEYBOARD: &str = "keyboard";

fn command(byte: u8) -> Option<ButtonEventType> {
    match byte {
        b'b' => Some(ButtonEventType::Pressed),
        b'r' => Some(ButtonEventType::Released),
        _ => None,
    }
}

/// Read `input` byte by byte until EOF or shutdown, broadcasting button events.
/// Returns the number of events broadcast.
pub async fn run_keyboard_source<R>(
    registry: ChimeRegistry,
    mut input: R,
    shutdown: CancellationToken,
) -> usize
where
    R: AsyncRead + Unpin,
{
    info!("keyboard source started (b = push, r = release)");
    let mut sent = 0;
    let mut buf = [0u8; 64];
    loop {
        let n = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = input.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    warn!(error = %e, "keyboard read failed");
                    break;
                }
            },
        };
        for &byte in &buf[..n] {
            let Some(kind) = command(byte) else {
                continue;
            };
            debug!(key = %(byte as char), "key read");
            match registry.broadcast(Event::button(kind, SOURCE_KEYBOARD)).await {
                Ok(_) => sent += 1,
                Err(e) => warn!(error = %e, "failed to broadcast keyboard event"),
            }
        }
    }
    info!(sent, "keyboard source stopped");
    sent
}

/// Run the keyboard source on stdin in the background.
///
/// Stdin is read on its own detached thread so a pending read never holds
/// the runtime open at shutdown.
pub fn spawn_keyboard_source(registry: ChimeRegistry, shutdown: CancellationToken) -> JoinHandle<usize> {
    let (reader, writer) = tokio::io::duplex(64);
    let handle = Handle::current();
    if let Err(e) = std::thread::Builder::new()
        .name("keyboard".to_string())
        .spawn(move || forward_blocking(handle, std::io::stdin().lock(), writer))
    {
        warn!(error = %e, "failed to start stdin reader");
    }
    tokio::spawn(run_keyboard_source(registry, reader, shutdown))
}

/// Copy a blocking reader into the async pipe until EOF. Runs off-runtime.
fn forward_blocking<R: std::io::Read>(handle: Handle, mut input: R, mut writer: DuplexStream) {
    let mut buf = [0u8; 64];
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "keyboard input read failed");
                break;
            }
        };
        // Fails once the async side is gone.
        if handle.block_on(writer.write_all(&buf[..n])).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn maps_keys_to_button_events() {
        let registry = ChimeRegistry::default();
        let porch = registry.register("porch", 1).await;

        let sent = run_keyboard_source(
            registry.clone(),
            &b"bxr\n"[..],
            CancellationToken::new(),
        )
        .await;
        assert_eq!(sent, 2);

        let mut kinds = Vec::new();
        while let Some(delivery) = porch.queue.try_recv() {
            match &delivery.event {
                Event::Button(e) => {
                    assert_eq!(e.source, SOURCE_KEYBOARD);
                    kinds.push(e.button_event_type);
                }
                other => panic!("unexpected event {:?}", other.kind()),
            }
        }
        assert_eq!(kinds, vec![ButtonEventType::Pressed, ButtonEventType::Released]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_input_is_forwarded_from_its_own_thread() {
        let registry = ChimeRegistry::default();
        let porch = registry.register("porch", 1).await;
        let (reader, writer) = tokio::io::duplex(64);
        let handle = Handle::current();
        let input = std::io::Cursor::new(b"b\nr\n".to_vec());
        let thread = std::thread::spawn(move || forward_blocking(handle, input, writer));

        let sent = run_keyboard_source(registry.clone(), reader, CancellationToken::new()).await;
        thread.join().unwrap();
        assert_eq!(sent, 2);
        assert_eq!(std::iter::from_fn(|| porch.queue.try_recv()).count(), 2);
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let registry = ChimeRegistry::default();
        let (_writer, reader) = tokio::io::duplex(16);
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_keyboard_source(registry, reader, shutdown.clone()));
        shutdown.cancel();
        assert_eq!(task.await.unwrap(), 0);
    }
}
