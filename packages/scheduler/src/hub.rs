//! Fan-out of events to any number of subscribers.
//!
//! Every subscriber gets its own unbounded queue, so publishing never blocks
//! and never drops an event for a live subscriber. A subscription removes
//! itself from the hub when dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

type Subscribers<T> = Arc<DashMap<u64, mpsc::UnboundedSender<T>>>;

pub struct Broadcaster<T> {
    next_id: AtomicU64,
    subscribers: Subscribers<T>,
    closed: AtomicBool,
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscribers: Arc::new(DashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a subscriber. Events published after this call are delivered
    /// to it in publish order.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if !self.closed.load(Ordering::Acquire) {
            self.subscribers.insert(id, tx);
        }
        Subscription {
            id,
            rx,
            subscribers: self.subscribers.clone(),
        }
    }

    pub fn publish(&self, event: T) {
        let mut gone = Vec::new();
        for entry in self.subscribers.iter() {
            if entry.value().send(event.clone()).is_err() {
                gone.push(*entry.key());
            }
        }
        for id in gone {
            self.subscribers.remove(&id);
        }
    }

    /// End every subscription. Later subscriptions end immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Broadcaster<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Subscription<T> {
    id: u64,
    rx: mpsc::UnboundedReceiver<T>,
    subscribers: Subscribers<T>,
}

impl<T> Subscription<T> {
    /// Next event, or `None` once the hub is closed and drained.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.subscribers.remove(&self.id);
    }
}
