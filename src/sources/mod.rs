//! Hub-side event sources that feed button events into the registry.

pub mod keyboard;

pub use keyboard::{run_keyboard_source, spawn_keyboard_source, SOURCE_KEYBOARD};
