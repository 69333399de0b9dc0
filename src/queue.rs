use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Unbounded FIFO shared between the connection handlers (many producers)
/// and the consumer (one reader).
///
/// There is no capacity limit: if the consumer falls behind, memory grows.
/// `total_pushed` and `len` let the queue monitor report the imbalance.
pub struct SharedQueue<T> {
    inner: Arc<Inner<T>>,
}

struct Inner<T> {
    entries: Mutex<VecDeque<T>>,
    available: Condvar,
    pushed: AtomicU64,
}

impl<T> Clone for SharedQueue<T> {
    fn clone(&self) -> Self {
        SharedQueue {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for SharedQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedQueue<T> {
    pub fn new() -> Self {
        SharedQueue {
            inner: Arc::new(Inner {
                entries: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                pushed: AtomicU64::new(0),
            }),
        }
    }

    // Every critical section below leaves the deque consistent.
    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.inner
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an entry and wake a blocked `pop`.
    pub fn push(&self, item: T) {
        self.lock().push_back(item);
        self.inner.pushed.fetch_add(1, Ordering::Relaxed);
        self.inner.available.notify_one();
    }

    /// Remove the oldest entry, blocking until one exists.
    pub fn pop(&self) -> T {
        let mut entries = self.lock();
        loop {
            if let Some(item) = entries.pop_front() {
                return item;
            }
            entries = self
                .inner
                .available
                .wait(entries)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.lock();
        loop {
            if let Some(item) = entries.pop_front() {
                return Some(item);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            entries = self
                .inner
                .available
                .wait_timeout(entries, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Remove the oldest entry without blocking.
    pub fn try_pop(&self) -> Option<T> {
        self.lock().pop_front()
    }

    /// Remove everything currently buffered, oldest first, without blocking.
    pub fn drain_available(&self) -> Vec<T> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Number of entries ever pushed.
    pub fn total_pushed(&self) -> u64 {
        self.inner.pushed.load(Ordering::Relaxed)
    }
}
