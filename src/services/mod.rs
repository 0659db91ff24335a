//! Hub services: bounded send queues, the chime registry, and its watchdog.

pub mod queue;
pub mod registry;
pub mod watchdog;

pub use queue::{Delivery, QueueSaturated, SendQueue, DEFAULT_QUEUE_CAPACITY};
pub use registry::{BroadcastReport, ChimeRegistry, RegistryError, Subscription};
pub use watchdog::spawn_watchdog;
