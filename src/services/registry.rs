//! Chime registry: chime name -> outbound queue and snooze expiry.
//!
//! All access goes through the methods below; the table itself is never
//! handed out. At most one queue per name is live: registering a name
//! again retires the previous queue before the new one is installed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::models::chime::{is_snoozed, ChimeInfo};
use crate::models::event::Event;
use crate::services::queue::{self, Delivery, QueueSender, SendQueue, DEFAULT_QUEUE_CAPACITY};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown chime: {0:?}")]
    UnknownChime(String),

    #[error("queue for chime {0:?} is full; event dropped")]
    QueueSaturated(String),

    #[error("failed to serialize event: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug)]
struct Registration {
    queue: QueueSender,
    connection_id: u64,
}

#[derive(Debug, Default)]
struct Table {
    chimes: HashMap<String, Registration>,
    /// Kept apart from `chimes` so a snooze outlives the connection that
    /// was live when it was set.
    snoozes: HashMap<String, DateTime<Utc>>,
}

impl Table {
    /// Active snooze for `name`; an expired one is pruned.
    fn active_snooze(&mut self, name: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let until = *self.snoozes.get(name)?;
        if is_snoozed(Some(until), now) {
            Some(until)
        } else {
            self.snoozes.remove(name);
            None
        }
    }

    fn info(&self, name: &str) -> ChimeInfo {
        ChimeInfo {
            name: name.to_string(),
            snooze_until: self.snoozes.get(name).copied(),
        }
    }
}

/// What a connection handler gets back from [`ChimeRegistry::register`].
#[derive(Debug)]
pub struct Subscription {
    pub name: String,
    pub connection_id: u64,
    pub queue: SendQueue,
    /// Still-active snooze carried over from a previous connection. A
    /// matching snooze event is already at the head of `queue`.
    pub inherited_snooze: Option<DateTime<Utc>>,
    /// True if an older connection for the same name was retired.
    pub replaced: bool,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    /// Chimes whose queue was full; the event was dropped for them.
    pub saturated: Vec<String>,
}

/// Shared, internally synchronized chime table. Cheap to clone.
#[derive(Clone)]
pub struct ChimeRegistry {
    table: Arc<RwLock<Table>>,
    capacity: usize,
    next_connection_id: Arc<AtomicU64>,
}

impl Default for ChimeRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl ChimeRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            table: Arc::new(RwLock::new(Table::default())),
            capacity,
            next_connection_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Allocate an id for a freshly accepted connection.
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Install a fresh queue for `name`, retiring any previous one. A
    /// still-active snooze, whether or not the old connection is still
    /// registered, is re-sent on the new queue before any other event can
    /// reach it.
    pub async fn register(&self, name: &str, connection_id: u64) -> Subscription {
        let (sender, queue) = queue::bounded(self.capacity);
        let mut table = self.table.write().await;

        let replaced = match table.chimes.get(name) {
            Some(old) => {
                old.queue.retire();
                info!(
                    chime = %name,
                    old_connection_id = old.connection_id,
                    connection_id,
                    "retired previous connection"
                );
                true
            }
            None => false,
        };

        let inherited_snooze = table.active_snooze(name, Utc::now());
        if let Some(until) = inherited_snooze {
            match Delivery::new(Event::snooze(until)) {
                Ok(delivery) => {
                    // Fresh queue, cannot be full.
                    let _ = sender.try_push(delivery);
                }
                Err(e) => warn!(chime = %name, error = %e, "failed to build snooze event"),
            }
        }

        table.chimes.insert(
            name.to_string(),
            Registration {
                queue: sender,
                connection_id,
            },
        );

        Subscription {
            name: name.to_string(),
            connection_id,
            queue,
            inherited_snooze,
            replaced,
        }
    }

    /// Enqueue `event` for every chime registered right now.
    pub async fn broadcast(&self, event: Event) -> Result<BroadcastReport, RegistryError> {
        let kind = event.kind();
        let delivery = Delivery::new(event)?;
        let table = self.table.read().await;

        let mut report = BroadcastReport::default();
        for (name, registration) in table.chimes.iter() {
            match registration.queue.try_push(delivery.clone()) {
                Ok(()) => report.delivered += 1,
                Err(_) => {
                    warn!(chime = %name, event_type = %kind, "queue saturated, event dropped");
                    report.saturated.push(name.clone());
                }
            }
        }
        info!(
            event_type = %kind,
            id = %delivery.event.id(),
            delivered = report.delivered,
            dropped = report.saturated.len(),
            "broadcast"
        );
        Ok(report)
    }

    /// Enqueue `event` for one chime.
    pub async fn send_to(&self, name: &str, event: Event) -> Result<(), RegistryError> {
        let delivery = Delivery::new(event)?;
        let table = self.table.read().await;
        let registration = table
            .chimes
            .get(name)
            .ok_or_else(|| RegistryError::UnknownChime(name.to_string()))?;
        push_one(name, &registration.queue, delivery)
    }

    /// Record a snooze and tell the chime about it.
    pub async fn set_snooze(&self, name: &str, until: DateTime<Utc>) -> Result<(), RegistryError> {
        let delivery = Delivery::new(Event::snooze(until))?;
        let mut guard = self.table.write().await;
        let table = &mut *guard;
        let registration = table
            .chimes
            .get(name)
            .ok_or_else(|| RegistryError::UnknownChime(name.to_string()))?;
        table.snoozes.insert(name.to_string(), until);
        info!(chime = %name, until = %until.to_rfc3339(), "snooze set");
        push_one(name, &registration.queue, delivery)
    }

    /// Clear a snooze and tell the chime about it.
    pub async fn clear_snooze(&self, name: &str) -> Result<(), RegistryError> {
        let delivery = Delivery::new(Event::unsnooze())?;
        let mut guard = self.table.write().await;
        let table = &mut *guard;
        let registration = table
            .chimes
            .get(name)
            .ok_or_else(|| RegistryError::UnknownChime(name.to_string()))?;
        table.snoozes.remove(name);
        info!(chime = %name, "snooze cleared");
        push_one(name, &registration.queue, delivery)
    }

    /// Drop the registration for `name` if `connection_id` still owns it,
    /// retiring its queue. A superseded handler calling this leaves its
    /// successor alone. The stored snooze is kept for the next connection.
    pub async fn remove_connection(&self, name: &str, connection_id: u64) -> bool {
        let mut table = self.table.write().await;
        let owned = table
            .chimes
            .get(name)
            .is_some_and(|registration| registration.connection_id == connection_id);
        if !owned {
            debug!(chime = %name, connection_id, "registration already replaced");
            return false;
        }
        if let Some(registration) = table.chimes.remove(name) {
            registration.queue.retire();
        }
        info!(chime = %name, connection_id, "chime removed");
        true
    }

    /// Snapshot of every registration, sorted by name.
    pub async fn list_chimes(&self) -> Vec<ChimeInfo> {
        let table = self.table.read().await;
        let mut infos: Vec<ChimeInfo> = table.chimes.keys().map(|name| table.info(name)).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub async fn get(&self, name: &str) -> Option<ChimeInfo> {
        let table = self.table.read().await;
        table.chimes.contains_key(name).then(|| table.info(name))
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.chimes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Retire and remove every chime whose queue has been full for longer
    /// than `grace`, and prune expired snoozes. Returns the names removed.
    pub async fn retire_saturated(&self, grace: Duration, now: Instant) -> Vec<String> {
        let mut table = self.table.write().await;
        let mut retired = Vec::new();
        table.chimes.retain(|name, registration| match registration.queue.saturated_for(now) {
            Some(full_for) if full_for >= grace => {
                registration.queue.retire();
                warn!(
                    chime = %name,
                    connection_id = registration.connection_id,
                    full_for_ms = full_for.as_millis() as u64,
                    "queue saturated past grace period, retiring connection"
                );
                retired.push(name.clone());
                false
            }
            _ => true,
        });
        let wall_now = Utc::now();
        table.snoozes.retain(|_, until| is_snoozed(Some(*until), wall_now));
        retired.sort();
        retired
    }
}

fn push_one(name: &str, queue: &QueueSender, delivery: Arc<Delivery>) -> Result<(), RegistryError> {
    queue.try_push(delivery).map_err(|_| {
        warn!(chime = %name, "queue saturated, event dropped");
        RegistryError::QueueSaturated(name.to_string())
    })
}
