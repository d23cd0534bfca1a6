//! Cooperative shutdown flag
//!
//! One flag per server, cloned into every reactor. Reactors observe it on
//! each epoll-wait tick (bounded at 5 ms), so shutdown latency is the tick
//! interval, never an async cancellation. There is no mid-task
//! cancellation: an in-flight handler always runs to completion.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared shutdown signal. Cheap to clone, observed by polling.
#[derive(Clone, Default)]
pub struct ShutdownFlag {
    tripped: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trip(&self) {
        self.tripped.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_tripped(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }
}
