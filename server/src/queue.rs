//! Bounded ingestion queue decoupling socket readers from aggregation workers.
//!
//! The queue is a FIFO with a fixed capacity and a shutdown flag. Producers
//! block for bounded time when the queue is full (the back-pressure policy is
//! decided by the caller: drop and log). Consumers block for bounded time when
//! the queue is empty so they notice shutdown promptly. After shutdown the
//! queue refuses new items but lets consumers drain what remains.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use shared::POP_TIMEOUT;
use tokio::sync::Notify;
use tokio::time::{self, Instant};

struct QueueInner<T> {
    items: VecDeque<T>,
    active: bool,
}

/// Blocking, timeout-aware FIFO with capacity and shutdown.
///
/// FIFO order is guaranteed between a single producer and a single consumer;
/// no ordering is guaranteed across producers, and fairness among consumers
/// is not required.
pub struct BoundedQueue<T> {
    inner: Mutex<QueueInner<T>>,
    not_empty: Notify,
    not_full: Notify,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates an empty queue with the given capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity.min(1024)),
                active: true,
            }),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts an item, waiting up to `timeout` for capacity.
    ///
    /// Returns `true` on insertion, `false` if the timeout elapsed with the
    /// queue still full or the queue has been shut down. The item is consumed
    /// either way; on `false` the caller decides how to report the drop.
    pub async fn push(&self, item: T, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut item = Some(item);
        loop {
            {
                let mut inner = self.lock();
                if !inner.active {
                    return false;
                }
                if inner.items.len() < self.capacity {
                    if let Some(item) = item.take() {
                        inner.items.push_back(item);
                    }
                    drop(inner);
                    self.not_empty.notify_one();
                    return true;
                }
            }
            if Instant::now() >= deadline {
                return false;
            }
            let _ = time::timeout_at(deadline, self.not_full.notified()).await;
        }
    }

    /// Removes the oldest item, waiting a short bounded interval if empty.
    ///
    /// Returns `None` when the wait elapses without an item, or when the
    /// queue is shut down and fully drained. Remaining items are still handed
    /// out after shutdown so no accepted record is lost.
    pub async fn try_pop(&self) -> Option<T> {
        let deadline = Instant::now() + POP_TIMEOUT;
        loop {
            {
                let mut inner = self.lock();
                if let Some(item) = inner.items.pop_front() {
                    drop(inner);
                    self.not_full.notify_one();
                    return Some(item);
                }
                if !inner.active {
                    return None;
                }
            }
            if Instant::now() >= deadline {
                return None;
            }
            let _ = time::timeout_at(deadline, self.not_empty.notified()).await;
        }
    }

    /// Marks the queue inactive and wakes all waiters.
    ///
    /// Idempotent. Subsequent `push` calls return `false`; `try_pop` drains
    /// the remaining items and then returns `None`.
    pub fn shutdown(&self) {
        {
            let mut inner = self.lock();
            inner.active = false;
        }
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    /// Number of items currently queued.
    pub fn len(&self) -> usize {
        self.lock().items.len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.lock().items.is_empty()
    }

    /// Whether the queue is accepting new items.
    pub fn is_active(&self) -> bool {
        self.lock().active
    }

    /// Configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
