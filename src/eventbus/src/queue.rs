//! Bounded per-subscription delivery queue with oldest-dropped overflow.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::Notify;

pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    overflowed: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            overflowed: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Non-blocking: drops the oldest queued item if full and bumps the
    /// overflow counter. Never blocks the publisher.
    pub fn push(&self, item: T) {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            items.pop_front();
            self.overflowed.fetch_add(1, Ordering::Relaxed);
        }
        items.push_back(item);
        drop(items);
        self.notify.notify_one();
    }

    pub fn overflow_count(&self) -> u64 {
        self.overflowed.load(Ordering::Relaxed)
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
        self.notify.notify_waiters();
    }

    fn try_pop(&self) -> Option<T> {
        self.items.lock().pop_front()
    }

    /// Await the next item, or `None` once the queue is closed and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.try_pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Relaxed) {
                return None;
            }
            self.notify.notified().await;
        }
    }
}
