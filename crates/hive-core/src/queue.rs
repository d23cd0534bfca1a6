//! Bounded blocking queue
//!
//! The dispatch primitive of the server: each worker thread owns one of
//! these and blocks on `pop`; the reactor thread only ever calls
//! `try_push`, so a full queue surfaces as a typed rejection instead of
//! blocking the I/O path. `stop()` wakes every blocked popper so worker
//! pools can drain and exit cleanly.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

/// Why a `try_push` was refused. The value is handed back so the caller
/// can turn it into a 503 (or retry) instead of losing it.
#[derive(Debug)]
pub enum PushError<T> {
    /// Queue at capacity - backpressure condition.
    Full(T),
    /// Queue stopped - shutting down.
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected value.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(v) | PushError::Closed(v) => v,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    stopped: bool,
}

/// Thread-safe bounded queue with blocking pop and non-blocking bulk drain.
pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    capacity: usize,
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
            }),
            not_empty: Condvar::new(),
            capacity,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push without blocking. Refuses when full or stopped, returning the
    /// value to the caller.
    pub fn try_push(&self, value: T) -> Result<(), PushError<T>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.stopped {
            return Err(PushError::Closed(value));
        }
        if inner.items.len() >= self.capacity {
            return Err(PushError::Full(value));
        }
        inner.items.push_back(value);
        drop(inner);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Block until an item is available or the queue is stopped. Returns
    /// `None` only after `stop()` with the queue fully drained - items
    /// enqueued before the stop are still delivered.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(v) = inner.items.pop_front() {
                return Some(v);
            }
            if inner.stopped {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Move everything currently queued into `out` without blocking.
    /// Returns the number of items drained.
    pub fn drain_into(&self, out: &mut Vec<T>) -> usize {
        let mut inner = self.inner.lock().unwrap();
        let n = inner.items.len();
        out.extend(inner.items.drain(..));
        n
    }

    /// Stop the queue and wake all blocked poppers.
    pub fn stop(&self) {
        self.inner.lock().unwrap().stopped = true;
        self.not_empty.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().unwrap().stopped
    }
}
