//! # hive-server
//!
//! The concurrent I/O engine of the hive HTTP server: a multi-reactor
//! epoll architecture where each I/O thread owns its own `SO_REUSEPORT`
//! listener, connection table and worker pool. Application handlers run
//! off the I/O path on worker threads; responses travel back to the
//! owning reactor over a lock-free queue and are written out there.
//!
//! Key properties:
//!
//! - at most one in-flight handler invocation per connection
//! - worker-queue overflow degrades to a 503, never a crash
//! - diagnostic endpoints answer even under worker saturation
//! - shutdown is cooperative: one flag, observed at the epoll tick
//!
//! ## Modules
//!
//! - `config` - env-driven startup configuration
//! - `listener` / `poll` - raw socket setup and the edge-triggered epoll
//!   wrapper
//! - `conn` - connection state machine and fd-keyed table
//! - `routes` / `auth` / `cors` - the seams application code plugs into
//! - `workers` - per-reactor worker pool with round-robin dispatch
//! - `reactor` - the event loop tying it all together
//! - `signal` / `server` - signalfd shutdown wait and server assembly

pub mod auth;
pub mod config;
pub mod conn;
pub mod cors;
pub mod error;
pub mod listener;
pub mod poll;
pub mod routes;
pub mod server;
pub mod signal;
pub mod workers;

mod reactor;

pub use auth::{AuthError, Claims, TokenVerifier};
pub use config::Config;
pub use cors::CorsPolicy;
pub use error::SetupError;
pub use routes::{Handler, HandlerError, RouteTable, ValidationError, Validator};
pub use server::{RunningServer, Server};
