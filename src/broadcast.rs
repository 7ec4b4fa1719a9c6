//! Fan-out of state-change events to dashboard subscribers
//!
//! Every subscriber owns a bounded queue. Publishing never waits: when a queue
//! is full its oldest entries are evicted and a single `Coalesced` marker at the
//! head of the queue records how many deliveries were lost, so a slow reader
//! sees an explicit gap instead of silently missing updates.
//!
//! ```text
//! publish ─┬─► [sub 1: e7 e8 e9      ] ─► ws task
//!          ├─► [sub 2: Coalesced(5) e9] ─► ws task (slow)
//!          └─► [sub 3: e9            ] ─► ws task
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::BroadcastEvent;

pub type SubscriberId = u64;

/// One item taken from a subscriber queue
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Event(BroadcastEvent),
    /// Stands in for `dropped` deliveries evicted because the reader fell behind
    Coalesced { dropped: u64 },
}

#[derive(Debug, Default)]
struct QueueState {
    items: VecDeque<Delivery>,
    closed: bool,
    dropped_total: u64,
}

#[derive(Debug)]
struct SubscriberQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity),
                ..QueueState::default()
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // queue state stays consistent across a panic in another holder
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `event`, evicting from the head when full; returns how many events were newly lost
    fn push(&self, event: BroadcastEvent) -> u64 {
        let mut state = self.lock();
        if state.closed {
            return 0;
        }

        let mut lost = 0;
        if state.items.len() >= self.capacity {
            let mut folded = 0;
            // leave room for the marker and the incoming event
            while state.items.len() > self.capacity - 2 {
                match state.items.pop_front() {
                    Some(Delivery::Event(_)) => lost += 1,
                    Some(Delivery::Coalesced { dropped }) => folded += dropped,
                    None => break,
                }
            }
            state.items.push_front(Delivery::Coalesced {
                dropped: folded + lost,
            });
            state.dropped_total += lost;
        }

        state.items.push_back(Delivery::Event(event));
        drop(state);

        self.notify.notify_one();
        lost
    }

    fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_one();
    }
}

/// Registry of subscribers and the single publish entry point
#[derive(Debug)]
pub struct Broadcaster {
    subscribers: DashMap<SubscriberId, Arc<SubscriberQueue>>,
    next_id: AtomicU64,
    capacity: usize,
    closed: AtomicBool,
    published: AtomicU64,
}

impl Broadcaster {
    /// `capacity` is clamped to at least 2: one slot for a gap marker, one for the newest event
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(2),
            closed: AtomicBool::new(false),
            published: AtomicU64::new(0),
        })
    }

    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.capacity));

        if self.closed.load(Ordering::Acquire) {
            queue.close();
        } else {
            self.subscribers.insert(id, queue.clone());
        }

        debug!("subscriber {id} connected ({} total)", self.subscribers.len());

        Subscription {
            id,
            queue,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver `event` to every subscriber; returns the number of queues it reached
    pub fn publish(&self, event: BroadcastEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        let targets: Vec<(SubscriberId, Arc<SubscriberQueue>)> = self
            .subscribers
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        for (id, queue) in &targets {
            let lost = queue.push(event.clone());
            if lost > 0 {
                debug!("subscriber {id} is lagging, coalesced {lost} more deliveries");
            }
        }

        trace!(
            agent_id = %event.agent_id,
            "published event to {} subscribers",
            targets.len()
        );
        targets.len()
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    fn remove(&self, id: SubscriberId) {
        if self.subscribers.remove(&id).is_some() {
            debug!("subscriber {id} disconnected ({} left)", self.subscribers.len());
        }
    }

    /// End every stream; later subscriptions start closed
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for entry in self.subscribers.iter() {
            entry.value().close();
        }
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn published_total(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// A connected consumer; dropping it unsubscribes and discards its queue
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    queue: Arc<SubscriberQueue>,
    registry: Weak<Broadcaster>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next delivery; `None` once the broadcaster is closed and the queue drained
    pub async fn recv(&mut self) -> Option<Delivery> {
        loop {
            {
                let mut state = self.queue.lock();
                if let Some(delivery) = state.items.pop_front() {
                    return Some(delivery);
                }
                if state.closed {
                    return None;
                }
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.queue.lock().items.pop_front()
    }

    /// Deliveries currently waiting, markers included
    pub fn pending(&self) -> usize {
        self.queue.lock().items.len()
    }

    /// Events lost to backpressure over the lifetime of this subscription
    pub fn dropped_total(&self) -> u64 {
        self.queue.lock().dropped_total
    }

    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.queue.close();
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
