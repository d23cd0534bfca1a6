//! # hive-core
//!
//! Platform-agnostic primitives shared by the hive HTTP server crates.
//! Nothing in here touches a socket or an epoll instance; that all lives
//! in `hive-server`.
//!
//! ## Modules
//!
//! - `buf` - per-connection receive buffer (chunked growth, hard cap)
//! - `queue` - bounded blocking queue used for task dispatch and response
//!   hand-off
//! - `log` - leveled stderr logging macros with a request-id scope
//! - `env` - environment variable utilities
//! - `metrics` - shared atomic counters and the `/metrics` snapshot
//! - `shutdown` - cooperative shutdown flag polled by the reactors

pub mod buf;
pub mod env;
pub mod log;
pub mod metrics;
pub mod queue;
pub mod shutdown;

// Re-exports for convenience
pub use buf::{BufferFull, RecvBuffer};
pub use env::{env_get, env_get_bool, env_get_opt, env_get_str};
pub use metrics::ServerMetrics;
pub use queue::{PushError, TaskQueue};
pub use shutdown::ShutdownFlag;
