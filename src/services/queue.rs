//! Bounded per-chime outbound queue.
//!
//! The registry holds the [`QueueSender`] and the connection handler holds
//! the [`SendQueue`]. Enqueueing never blocks: a full queue drops the new
//! event (see [`QueueSender::try_push`]) and remembers when it first filled
//! up, so the watchdog can retire consumers that stopped draining.
//! Retirement ([`QueueSender::retire`]) evicts the oldest entry if needed so
//! the stop signal always lands.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::models::event::Event;

/// Default outbound queue bound per chime.
pub const DEFAULT_QUEUE_CAPACITY: usize = 50;

/// An event plus its wire form, serialized once and shared between queues.
#[derive(Debug)]
pub struct Delivery {
    pub event: Event,
    pub payload: String,
}

impl Delivery {
    pub fn new(event: Event) -> Result<Arc<Self>, serde_json::Error> {
        let payload = event.to_json()?;
        Ok(Arc::new(Self { event, payload }))
    }
}

/// Returned when an event was dropped because the queue was full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSaturated;

#[derive(Debug, Default)]
struct State {
    items: VecDeque<Arc<Delivery>>,
    saturated_since: Option<Instant>,
}

#[derive(Debug)]
struct Shared {
    capacity: usize,
    state: Mutex<State>,
    notify: Notify,
    retired: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a connected sender/receiver pair.
pub fn bounded(capacity: usize) -> (QueueSender, SendQueue) {
    let shared = Arc::new(Shared {
        capacity: capacity.max(1),
        state: Mutex::new(State::default()),
        notify: Notify::new(),
        retired: CancellationToken::new(),
    });
    (
        QueueSender {
            shared: shared.clone(),
        },
        SendQueue { shared },
    )
}

/// Producer half, owned by the registry.
#[derive(Debug, Clone)]
pub struct QueueSender {
    shared: Arc<Shared>,
}

impl QueueSender {
    /// Append `delivery` unless the queue is full (drop-newest).
    pub fn try_push(&self, delivery: Arc<Delivery>) -> Result<(), QueueSaturated> {
        {
            let mut state = self.shared.lock();
            if state.items.len() >= self.shared.capacity {
                state.saturated_since.get_or_insert_with(Instant::now);
                return Err(QueueSaturated);
            }
            state.items.push_back(delivery);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Enqueue a stop event, evicting the oldest entry when full, and raise
    /// the retirement signal. Returns false if already retired.
    pub fn retire(&self) -> bool {
        if self.shared.retired.is_cancelled() {
            return false;
        }
        // Stop events are consumed by the handler, never written out.
        let stop = Arc::new(Delivery {
            payload: String::new(),
            event: Event::stop_processing(),
        });
        {
            let mut state = self.shared.lock();
            if state.items.len() >= self.shared.capacity {
                state.items.pop_front();
            }
            state.items.push_back(stop);
        }
        self.shared.retired.cancel();
        self.shared.notify.notify_one();
        true
    }

    pub fn is_retired(&self) -> bool {
        self.shared.retired.is_cancelled()
    }

    /// How long the queue has been continuously full, if it is.
    pub fn saturated_for(&self, now: Instant) -> Option<Duration> {
        self.shared
            .lock()
            .saturated_since
            .map(|since| now.saturating_duration_since(since))
    }

    pub fn len(&self) -> usize {
        self.shared.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True if `queue` is the consumer half of this sender.
    pub fn feeds(&self, queue: &SendQueue) -> bool {
        Arc::ptr_eq(&self.shared, &queue.shared)
    }
}

/// Consumer half, owned by one connection handler.
#[derive(Debug)]
pub struct SendQueue {
    shared: Arc<Shared>,
}

impl SendQueue {
    fn pop(&self) -> Option<Arc<Delivery>> {
        let mut state = self.shared.lock();
        let item = state.items.pop_front();
        if state.items.len() < self.shared.capacity {
            state.saturated_since = None;
        }
        item
    }

    /// Wait for the next event in FIFO order.
    pub async fn recv(&self) -> Arc<Delivery> {
        loop {
            if let Some(item) = self.pop() {
                return item;
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-waiting variant of [`SendQueue::recv`].
    pub fn try_recv(&self) -> Option<Arc<Delivery>> {
        self.pop()
    }

    /// Resolves once the registry has retired this queue.
    pub fn retired(&self) -> WaitForCancellationFuture<'_> {
        self.shared.retired.cancelled()
    }

    pub fn is_retired(&self) -> bool {
        self.shared.retired.is_cancelled()
    }
}
