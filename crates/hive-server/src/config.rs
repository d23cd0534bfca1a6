//! Server configuration
//!
//! Read once at startup (env phase, optionally overridden by CLI flags in
//! the binary), then passed by reference. Nothing re-reads the environment
//! after `from_env`.
//!
//! # Environment Variables
//!
//! - `HIVE_PORT` - listening port (default 8080)
//! - `HIVE_IO_THREADS` - reactor count (default: available parallelism)
//! - `HIVE_WORKERS` - total worker pool size across all reactors
//! - `HIVE_QUEUE_CAP` - per-worker task queue capacity (default 1024)
//! - `HIVE_MAX_REQUEST_BYTES` - receive buffer cap (default 5 MiB)
//! - `HIVE_IDLE_TIMEOUT_SECS` - idle connection sweep threshold (default 60)
//! - `HIVE_CORS_ORIGINS` - comma-separated origin allow-list (`*` allows any)
//! - `HIVE_POD_NAME` - identity reported by `/version` (falls back to HOSTNAME)

use std::time::Duration;

use hive_core::buf::DEFAULT_MAX_SIZE;
use hive_core::env::{env_get, env_get_str};

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub io_threads: usize,
    /// Total worker pool size; divided evenly across reactors.
    pub total_workers: usize,
    pub queue_capacity: usize,
    pub max_request_bytes: usize,
    pub idle_timeout: Duration,
    pub cors_origins: Vec<String>,
    pub pod_name: String,
    pub version: String,
}

impl Default for Config {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            port: 8080,
            io_threads: cpus,
            total_workers: cpus * 4,
            queue_capacity: 1024,
            max_request_bytes: DEFAULT_MAX_SIZE,
            idle_timeout: Duration::from_secs(60),
            cors_origins: Vec::new(),
            pod_name: env_get_str("HOSTNAME", "hive"),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl Config {
    /// Env-var phase of the two-phase configuration.
    pub fn from_env() -> Self {
        let defaults = Config::default();
        let io_threads: usize = env_get("HIVE_IO_THREADS", defaults.io_threads).max(1);
        Self {
            port: env_get("HIVE_PORT", defaults.port),
            io_threads,
            total_workers: env_get("HIVE_WORKERS", io_threads * 4).max(1),
            queue_capacity: env_get("HIVE_QUEUE_CAP", defaults.queue_capacity).max(1),
            max_request_bytes: env_get("HIVE_MAX_REQUEST_BYTES", defaults.max_request_bytes),
            idle_timeout: Duration::from_secs(env_get("HIVE_IDLE_TIMEOUT_SECS", 60u64)),
            cors_origins: split_origins(&env_get_str("HIVE_CORS_ORIGINS", "")),
            pod_name: env_get_str("HIVE_POD_NAME", &defaults.pod_name),
            version: defaults.version,
        }
    }

    // ── Builder-style setters (CLI override phase, tests) ──

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_io_threads(mut self, n: usize) -> Self {
        self.io_threads = n.max(1);
        self
    }

    pub fn with_workers(mut self, n: usize) -> Self {
        self.total_workers = n.max(1);
        self
    }

    pub fn with_queue_capacity(mut self, n: usize) -> Self {
        self.queue_capacity = n.max(1);
        self
    }

    pub fn with_max_request_bytes(mut self, n: usize) -> Self {
        self.max_request_bytes = n;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = origins;
        self
    }

    pub fn with_pod_name(mut self, name: &str) -> Self {
        self.pod_name = name.to_string();
        self
    }

    /// Worker threads per reactor: total pool divided by I/O threads,
    /// never below one.
    pub fn workers_per_reactor(&self) -> usize {
        (self.total_workers / self.io_threads).max(1)
    }
}

fn split_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
