//! Shared server metrics
//!
//! One `ServerMetrics` per process, shared across every reactor and worker
//! thread. All hot-path updates are single atomic increments; the only
//! aggregation happens when `/metrics` asks for a snapshot. Gauges that
//! describe static configuration (thread counts, queue capacity) are set
//! once at startup.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::{json, Value};

/// Process-wide counters and gauges, concurrent-increment safe.
#[derive(Default)]
pub struct ServerMetrics {
    // Counters
    total_connections: AtomicU64,
    total_requests: AtomicU64,
    total_responses: AtomicU64,
    latency_micros: AtomicU64,
    dispatched: AtomicU64,
    queue_rejections: AtomicU64,
    parse_errors: AtomicU64,

    // Gauges
    active_connections: AtomicI64,
    io_threads: AtomicU64,
    worker_threads: AtomicU64,
    queue_capacity: AtomicU64,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record static configuration once at startup.
    pub fn set_topology(&self, io_threads: usize, workers: usize, queue_capacity: usize) {
        self.io_threads.store(io_threads as u64, Ordering::Relaxed);
        self.worker_threads.store(workers as u64, Ordering::Relaxed);
        self.queue_capacity
            .store(queue_capacity as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn request_received(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn response_written(&self) {
        self.total_responses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn task_dispatched(&self) {
        self.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn queue_rejected(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn parse_error(&self) {
        self.parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Add one handler invocation's wall time to the latency sum.
    #[inline]
    pub fn record_latency(&self, elapsed: Duration) {
        self.latency_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn queue_rejections(&self) -> u64 {
        self.queue_rejections.load(Ordering::Relaxed)
    }

    /// JSON snapshot served by `/metrics`.
    pub fn snapshot(&self) -> Value {
        let requests = self.total_requests.load(Ordering::Relaxed);
        let latency = self.latency_micros.load(Ordering::Relaxed);
        let avg_latency_micros = if requests > 0 { latency / requests } else { 0 };

        json!({
            "requests_total": requests,
            "responses_total": self.total_responses.load(Ordering::Relaxed),
            "avg_latency_micros": avg_latency_micros,
            "connections_total": self.total_connections.load(Ordering::Relaxed),
            "connections_active": self.active_connections.load(Ordering::Relaxed),
            "tasks_dispatched": self.dispatched.load(Ordering::Relaxed),
            "queue_rejections": self.queue_rejections.load(Ordering::Relaxed),
            "parse_errors": self.parse_errors.load(Ordering::Relaxed),
            "io_threads": self.io_threads.load(Ordering::Relaxed),
            "worker_threads": self.worker_threads.load(Ordering::Relaxed),
            "queue_capacity": self.queue_capacity.load(Ordering::Relaxed),
            "memory_rss_kb": rss_kb(),
        })
    }
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        /// Resident set size in KiB from /proc/self/statm (second field,
        /// in pages).
        fn rss_kb() -> u64 {
            let statm = match std::fs::read_to_string("/proc/self/statm") {
                Ok(s) => s,
                Err(_) => return 0,
            };
            let pages: u64 = statm
                .split_whitespace()
                .nth(1)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let page = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            let page_kb = if page > 0 { page as u64 / 1024 } else { 4 };
            pages * page_kb
        }
    } else {
        fn rss_kb() -> u64 {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = ServerMetrics::new();
        m.connection_opened();
        m.connection_opened();
        m.connection_closed();
        m.request_received();
        m.task_dispatched();
        m.queue_rejected();
        m.record_latency(Duration::from_micros(300));

        assert_eq!(m.active_connections(), 1);
        assert_eq!(m.total_requests(), 1);
        assert_eq!(m.queue_rejections(), 1);
    }

    #[test]
    fn test_snapshot_shape() {
        let m = ServerMetrics::new();
        m.set_topology(2, 8, 128);
        m.request_received();
        m.record_latency(Duration::from_micros(500));

        let snap = m.snapshot();
        assert_eq!(snap["requests_total"], 1);
        assert_eq!(snap["avg_latency_micros"], 500);
        assert_eq!(snap["io_threads"], 2);
        assert_eq!(snap["worker_threads"], 8);
        assert_eq!(snap["queue_capacity"], 128);
        assert!(snap.get("memory_rss_kb").is_some());
    }

    #[test]
    fn test_avg_latency_zero_requests() {
        let m = ServerMetrics::new();
        assert_eq!(m.snapshot()["avg_latency_micros"], 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_rss_reported_in_kib() {
        let rss = ServerMetrics::new().snapshot()["memory_rss_kb"]
            .as_u64()
            .unwrap();
        // A running test process always has resident pages
        assert!(rss > 0);
    }
}
