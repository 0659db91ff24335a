//! Data models for events, the hello handshake, and chime snapshots.

pub mod chime;
pub mod duration;
pub mod event;
pub mod hello;

pub use chime::*;
pub use duration::parse_duration;
pub use event::*;
pub use hello::*;
