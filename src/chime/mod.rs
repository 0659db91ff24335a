//! Chime side: reconnecting hub client, event dispatch, status LED blinking.

pub mod blink;
pub mod client;
pub mod dispatch;

pub use blink::{start_blink, BlinkHandle, BlinkPattern};
pub use client::{ChimeClient, ClientError, ClientState};
pub use dispatch::{Dispatcher, Outcome};
