//! Typed in-process publish/subscribe (module F).
//!
//! Each subscription owns a dedicated bounded queue and a task that drains
//! it single-threaded, so a handler never sees concurrent invocations and
//! never blocks the publisher. A handler that panics is caught and logged;
//! the subscription is not torn down.

use crate::queue::BoundedQueue;
use dashmap::DashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const DEFAULT_QUEUE_CAPACITY: usize = 256;

struct SubscriptionHandle<T> {
    queue: Arc<BoundedQueue<T>>,
    task: tokio::task::JoinHandle<()>,
}

/// A live subscription. Dropping it (or calling `unsubscribe`) stops
/// delivery and aborts the drain task.
pub struct Subscription<T: Send + 'static> {
    id: u64,
    bus: EventBus<T>,
}

impl<T: Send + 'static> Subscription<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {
        self.bus.remove(self.id);
    }

    /// Queued-but-not-yet-delivered items dropped due to a full queue.
    pub fn overflow_count(&self) -> u64 {
        self.bus
            .inner
            .subscriptions
            .get(&self.id)
            .map(|h| h.queue.overflow_count())
            .unwrap_or(0)
    }
}

struct EventBusInner<T> {
    subscriptions: DashMap<u64, SubscriptionHandle<T>>,
    next_id: AtomicU64,
}

/// Generic typed event bus. `T` must be `Clone` because publishing fans a
/// single event out to every subscriber's own queue.
pub struct EventBus<T> {
    inner: Arc<EventBusInner<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler with the default queue capacity.
    pub fn subscribe<F>(&self, handler: F) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.subscribe_with_capacity(handler, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn subscribe_with_capacity<F>(&self, handler: F, capacity: usize) -> Subscription<T>
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(BoundedQueue::new(capacity));
        let queue_for_task = queue.clone();
        let handler = Arc::new(handler);

        let task = tokio::spawn(async move {
            while let Some(event) = queue_for_task.pop().await {
                let handler = handler.clone();
                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(event)));
                if let Err(panic) = outcome {
                    tracing::error!(?panic, "event bus subscriber handler panicked; subscription remains active");
                }
            }
        });

        self.inner.subscriptions.insert(id, SubscriptionHandle { queue, task });
        Subscription { id, bus: self.clone() }
    }

    /// Fire-and-forget publish to every live subscription's queue.
    pub fn publish(&self, event: T) {
        for entry in self.inner.subscriptions.iter() {
            entry.value().queue.push(event.clone());
        }
    }

    fn remove(&self, id: u64) {
        if let Some((_, handle)) = self.inner.subscriptions.remove(&id) {
            handle.queue.close();
            handle.task.abort();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
