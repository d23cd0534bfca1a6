//! Server assembly and lifecycle
//!
//! Builds N reactors from one `Config`, spawns each on a named OS thread,
//! and blocks the calling thread on the signal wait. A tripped shutdown
//! flag is observed by every reactor within one epoll tick; each reactor
//! then stops its worker pool and the joins cascade back here.
//!
//! Reactor construction happens before any thread is spawned, so a fatal
//! setup error (bind failure, epoll failure) aborts startup cleanly with
//! nothing to unwind.

use std::sync::Arc;
use std::thread::JoinHandle;

use hive_core::shutdown::ShutdownFlag;
use hive_core::ServerMetrics;
use hive_core::{herror, hinfo};

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::cors::CorsPolicy;
use crate::error::SetupError;
use crate::reactor::Reactor;
use crate::routes::RouteTable;
use crate::signal::{ignore_sigpipe, ShutdownSignal};

pub struct Server {
    config: Config,
    routes: Arc<RouteTable>,
    verifier: Arc<dyn TokenVerifier>,
    metrics: Arc<ServerMetrics>,
    shutdown: ShutdownFlag,
}

impl Server {
    pub fn new(config: Config, routes: RouteTable, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self {
            config,
            routes: Arc::new(routes),
            verifier,
            metrics: Arc::new(ServerMetrics::new()),
            shutdown: ShutdownFlag::default(),
        }
    }

    /// Shared metrics handle, for a stats thread or tests.
    pub fn metrics(&self) -> Arc<ServerMetrics> {
        self.metrics.clone()
    }

    /// The cooperative shutdown flag; tripping it stops a running server.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    /// Build and spawn the reactors without waiting for a signal. Used by
    /// embedders and tests; `run` is the signal-driven wrapper.
    pub fn start(self) -> Result<RunningServer, SetupError> {
        hive_core::log::init();

        self.metrics.set_topology(
            self.config.io_threads,
            self.config.workers_per_reactor() * self.config.io_threads,
            self.config.queue_capacity,
        );
        let cors = Arc::new(CorsPolicy::new(self.config.cors_origins.clone()));

        // Construct every reactor before spawning any: a bind or epoll
        // failure must abort startup, not strand half a server.
        let mut reactors = Vec::with_capacity(self.config.io_threads);
        for id in 0..self.config.io_threads {
            reactors.push(Reactor::new(
                id,
                &self.config,
                self.routes.clone(),
                self.verifier.clone(),
                cors.clone(),
                self.metrics.clone(),
                self.shutdown.clone(),
            )?);
        }

        let mut handles = Vec::with_capacity(reactors.len());
        for (id, reactor) in reactors.into_iter().enumerate() {
            let handle = std::thread::Builder::new()
                .name(format!("hive-io{}", id))
                .spawn(move || reactor.run())
                .map_err(SetupError::Thread)?;
            handles.push(handle);
        }

        hinfo!(
            "hive: listening on 0.0.0.0:{} ({} reactors x {} workers, queue cap {})",
            self.config.port,
            self.config.io_threads,
            self.config.workers_per_reactor(),
            self.config.queue_capacity
        );

        Ok(RunningServer {
            shutdown: self.shutdown,
            handles,
            port: self.config.port,
        })
    }

    /// Run until SIGINT/SIGTERM/SIGQUIT. Blocks the calling thread.
    ///
    /// Call while the process is still single-threaded: the signal mask
    /// installed here is only inherited by threads spawned afterwards. A
    /// pre-existing thread with an unblocked mask could take a
    /// process-directed signal with default disposition and kill the
    /// process. Binaries that spawn helper threads should install
    /// `ShutdownSignal` themselves first and use `start`.
    pub fn run(self) -> Result<(), SetupError> {
        ignore_sigpipe();
        // Before any spawn, so every thread inherits the mask
        let mut signals = ShutdownSignal::install()?;

        let running = self.start()?;

        match signals.wait() {
            Some(signo) => hinfo!("signal {} received, shutting down", signo),
            None => herror!("signal wait failed, shutting down"),
        }
        running.stop();
        hinfo!("shutdown complete");
        Ok(())
    }
}

/// Handle to a started server: trips the flag and joins the reactors.
pub struct RunningServer {
    shutdown: ShutdownFlag,
    handles: Vec<JoinHandle<()>>,
    port: u16,
}

impl RunningServer {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stop(self) {
        self.shutdown.trip();
        for h in self.handles {
            let _ = h.join();
        }
    }
}
