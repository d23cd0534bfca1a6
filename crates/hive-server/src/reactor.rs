//! Reactor: the per-thread I/O event loop
//!
//! One reactor per configured I/O thread. Each owns its listening socket
//! (`SO_REUSEPORT` spreads accepts across reactors in the kernel), a
//! private epoll instance, the connection table, a worker pool, and the
//! response queue its workers push onto. Nothing in here is shared with
//! another reactor; the only cross-thread objects are the metrics, the
//! read-only route table and the shutdown flag.
//!
//! The loop never blocks except in `epoll_wait` with a 5 ms timeout; the
//! timeout exists purely so the shutdown flag is observed promptly. All
//! sockets are edge-triggered, so every read and write drains to `EAGAIN`.
//!
//! Diagnostic endpoints (`/ping`, `/version`, `/metrics`) and CORS
//! screening are answered synchronously on this thread - they must work
//! under worker-pool saturation, which is exactly when you need them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use hive_core::queue::PushError;
use hive_core::shutdown::ShutdownFlag;
use hive_core::ServerMetrics;
use hive_core::{hdebug, herror, hinfo, htrace, hwarn};
use hive_http::{Method, Request, Response, Status};
use nix::sys::epoll::{EpollEvent, EpollFlags};

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::conn::{ConnState, ConnTable, Connection, Generation};
use crate::cors::CorsPolicy;
use crate::error::SetupError;
use crate::listener::{last_errno, Listener};
use crate::poll::Poller;
use crate::routes::RouteTable;
use crate::workers::{ResponseItem, Task, WorkerContext, WorkerPool};

/// Epoll wait bound; the cadence at which the shutdown flag is polled.
const EPOLL_WAIT_MS: u16 = 5;
const EVENT_BATCH: usize = 256;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// What a read/parse/write step left behind.
enum Step {
    /// Request incomplete; wait for more bytes.
    Idle,
    /// Request handed to a worker; reads paused.
    Dispatched,
    /// Response fully written and the connection reset; pipelined bytes
    /// may already be buffered.
    KeepAlive,
    /// Partial write; EPOLLOUT armed.
    WritePending,
    Closed,
}

enum Fill {
    Drained,
    Overflow,
    Closed,
}

pub(crate) struct Reactor {
    id: usize,
    listener: Listener,
    poller: Poller,
    conns: ConnTable,
    pool: WorkerPool,
    responses: Arc<ArrayQueue<ResponseItem>>,
    cors: Arc<CorsPolicy>,
    metrics: Arc<ServerMetrics>,
    shutdown: ShutdownFlag,
    max_request_bytes: usize,
    idle_timeout: Duration,
    version_body: serde_json::Value,
    next_generation: Generation,
}

impl Reactor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: usize,
        config: &Config,
        routes: Arc<RouteTable>,
        verifier: Arc<dyn TokenVerifier>,
        cors: Arc<CorsPolicy>,
        metrics: Arc<ServerMetrics>,
        shutdown: ShutdownFlag,
    ) -> Result<Self, SetupError> {
        let listener = Listener::bind(config.port)?;
        let poller = Poller::new()?;
        poller
            .add_readable(listener.fd())
            .map_err(SetupError::Epoll)?;

        let workers = config.workers_per_reactor();
        // Sized for every task a worker can hold at once: its queue, a
        // drained batch of equal size, and the one executing. Worker
        // pushes cannot fail by construction.
        let slots = workers * (2 * config.queue_capacity + 1) + 1;
        let responses = Arc::new(ArrayQueue::new(slots));

        let ctx = Arc::new(WorkerContext {
            routes,
            verifier,
            cors: cors.clone(),
            metrics: metrics.clone(),
            responses: responses.clone(),
        });
        let pool = WorkerPool::start(id, workers, config.queue_capacity, ctx);

        Ok(Self {
            id,
            listener,
            poller,
            conns: ConnTable::new(),
            pool,
            responses,
            cors,
            metrics,
            shutdown,
            max_request_bytes: config.max_request_bytes,
            idle_timeout: config.idle_timeout,
            version_body: serde_json::json!({
                "pod": config.pod_name,
                "version": config.version,
            }),
            next_generation: 0,
        })
    }

    /// The event loop. Runs until the shutdown flag trips, then stops the
    /// worker pool and drops every connection.
    pub(crate) fn run(mut self) {
        hinfo!(
            "reactor {}: serving with {} workers",
            self.id,
            self.pool.worker_count()
        );

        let mut events = vec![EpollEvent::empty(); EVENT_BATCH];
        let mut last_sweep = Instant::now();

        while !self.shutdown.is_tripped() {
            let n = match self.poller.wait(&mut events, EPOLL_WAIT_MS) {
                Ok(n) => n,
                Err(nix::errno::Errno::EINTR) => 0,
                Err(e) => {
                    herror!("reactor {}: epoll wait failed: {}", self.id, e);
                    break;
                }
            };

            for ev in events.iter().take(n) {
                let fd = ev.data() as i32;
                let flags = ev.events();

                if fd == self.listener.fd() {
                    self.accept_ready();
                    continue;
                }
                // Read before acting on RDHUP: a peer may send a request
                // and immediately shut down its write side.
                if flags.contains(EpollFlags::EPOLLIN) {
                    self.read_ready(fd);
                } else if flags.intersects(
                    EpollFlags::EPOLLHUP | EpollFlags::EPOLLERR | EpollFlags::EPOLLRDHUP,
                ) {
                    self.close_conn(fd);
                    continue;
                }
                if flags.contains(EpollFlags::EPOLLOUT) {
                    self.write_ready(fd);
                }
            }

            self.drain_responses();

            if last_sweep.elapsed() >= SWEEP_INTERVAL {
                self.sweep_idle();
                last_sweep = Instant::now();
            }
        }

        hinfo!(
            "reactor {}: shutting down, {} connections open",
            self.id,
            self.conns.len()
        );
        self.pool.stop();
    }

    // ── Accept ──

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok(Some((fd, ip))) => {
                    self.next_generation += 1;
                    if let Err(e) = self.poller.add_readable(fd) {
                        herror!("reactor {}: epoll add failed for fd {}: {}", self.id, fd, e);
                        unsafe { libc::close(fd) };
                        continue;
                    }
                    self.conns.insert(Connection::new(
                        fd,
                        self.next_generation,
                        ip,
                        self.max_request_bytes,
                    ));
                    self.metrics.connection_opened();
                    htrace!("reactor {}: accepted fd {} from {}", self.id, fd, ip);
                    // The socket may have been readable before registration
                    self.read_ready(fd);
                }
                Ok(None) => return,
                Err(e) => {
                    hwarn!("reactor {}: accept failed: {}", self.id, e);
                    return;
                }
            }
        }
    }

    // ── Read path ──

    fn read_ready(&mut self, fd: i32) {
        loop {
            match self.conns.get_mut(fd).map(|c| c.state()) {
                Some(ConnState::Reading) => {}
                // Dispatched/Writing: single-in-flight rule, no reads
                _ => return,
            }
            let at_cap = match self.fill(fd) {
                Fill::Closed => return,
                // The buffer takes no more bytes, but a request ending
                // exactly at the cap is still valid; check completeness
                // before rejecting.
                Fill::Overflow => true,
                Fill::Drained => false,
            };
            match self.advance(fd) {
                // Response already drained; loop for pipelined bytes
                Step::KeepAlive => continue,
                Step::Idle if at_cap => {
                    self.metrics.parse_error();
                    hwarn!(
                        "reactor {}: fd {} exceeded the request size limit",
                        self.id,
                        fd
                    );
                    let mut resp = Response::error(Status::BadRequest, "request too large");
                    resp.set_close(true);
                    let _ = self.respond(fd, resp);
                    return;
                }
                _ => return,
            }
        }
    }

    /// Drain the socket into the connection buffer until `EAGAIN`.
    fn fill(&mut self, fd: i32) -> Fill {
        loop {
            let conn = match self.conns.get_mut(fd) {
                Some(c) => c,
                None => return Fill::Closed,
            };
            let tail = match conn.writable_tail() {
                Ok(t) => t,
                Err(_) => return Fill::Overflow,
            };
            let n = unsafe { libc::read(fd, tail.as_mut_ptr() as *mut libc::c_void, tail.len()) };
            if n > 0 {
                conn.commit(n as usize);
                conn.touch();
                continue;
            }
            if n == 0 {
                // Peer EOF
                self.close_conn(fd);
                return Fill::Closed;
            }
            match last_errno() {
                libc::EAGAIN => return Fill::Drained,
                libc::EINTR => continue,
                errno => {
                    hdebug!(
                        "reactor {}: read error on fd {}: {}",
                        self.id,
                        fd,
                        std::io::Error::from_raw_os_error(errno)
                    );
                    self.close_conn(fd);
                    return Fill::Closed;
                }
            }
        }
    }

    /// Parse whatever is buffered and move the connection forward:
    /// incomplete, answered inline, dispatched, or torn down on a
    /// protocol error.
    fn advance(&mut self, fd: i32) -> Step {
        let complete = {
            let conn = match self.conns.get_mut(fd) {
                Some(c) => c,
                None => return Step::Closed,
            };
            match conn.check_complete() {
                Ok(b) => b,
                Err(pe) => {
                    self.metrics.parse_error();
                    hwarn!("reactor {}: parse error on fd {}: {}", self.id, fd, pe);
                    let mut resp = Response::error(Status::BadRequest, pe.message());
                    resp.set_close(true);
                    return self.respond(fd, resp);
                }
            }
        };
        if !complete {
            return Step::Idle;
        }

        let (request, generation) = {
            let conn = match self.conns.get_mut(fd) {
                Some(c) => c,
                None => return Step::Closed,
            };
            let generation = conn.generation();
            match conn.take_request() {
                Ok(r) => (r, generation),
                Err(pe) => {
                    self.metrics.parse_error();
                    hwarn!("reactor {}: parse error on fd {}: {}", self.id, fd, pe);
                    let mut resp = Response::error(Status::BadRequest, pe.message());
                    resp.set_close(true);
                    return self.respond(fd, resp);
                }
            }
        };
        self.metrics.request_received();

        if let Some(mut resp) = self.inline_response(&request) {
            if wants_close(&request) {
                resp.set_close(true);
            }
            return self.respond(fd, resp);
        }

        let task = Task {
            fd,
            generation,
            request: Arc::new(request),
        };
        match self.pool.dispatch(task) {
            Ok(()) => {
                self.metrics.task_dispatched();
                if let Some(conn) = self.conns.get_mut(fd) {
                    conn.set_state(ConnState::Dispatched);
                    conn.touch();
                }
                Step::Dispatched
            }
            Err(PushError::Full(task)) => {
                // Backpressure: a synchronous 503, connection kept open
                self.metrics.queue_rejected();
                hwarn!(
                    "reactor {}: worker queues full, rejecting {} {}",
                    self.id,
                    task.request.method().as_str(),
                    task.request.path()
                );
                let mut resp = Response::error(Status::ServiceUnavailable, "server overloaded");
                if wants_close(&task.request) {
                    resp.set_close(true);
                }
                self.respond(fd, resp)
            }
            Err(PushError::Closed(_)) => {
                let mut resp = Response::error(Status::ServiceUnavailable, "shutting down");
                resp.set_close(true);
                self.respond(fd, resp)
            }
        }
    }

    /// CORS screening and diagnostic endpoints, answered without leaving
    /// the I/O thread.
    fn inline_response(&self, req: &Request) -> Option<Response> {
        if let Some(resp) = self.cors.screen(req) {
            return Some(resp);
        }
        if req.method() != Method::Get {
            return None;
        }
        let mut resp = Response::new();
        match req.path() {
            "/ping" => resp.set_json(&serde_json::json!({ "status": "OK" })),
            "/version" => resp.set_json(&self.version_body),
            "/metrics" => resp.set_json(&self.metrics.snapshot()),
            _ => return None,
        }
        if let Some(origin) = req.header("origin") {
            if self.cors.is_allowed(origin) {
                resp.set_header("Access-Control-Allow-Origin", origin);
            }
        }
        Some(resp)
    }

    // ── Write path ──

    /// Stage a response on the connection and push bytes immediately.
    fn respond(&mut self, fd: i32, resp: Response) -> Step {
        let close = resp.is_close();
        let bytes = resp.to_bytes();
        match self.conns.get_mut(fd) {
            Some(conn) => conn.begin_write(bytes, close),
            None => return Step::Closed,
        }
        self.flush(fd)
    }

    /// Write pending response bytes until drained or `EAGAIN`.
    fn flush(&mut self, fd: i32) -> Step {
        enum Outcome {
            Done { close: bool },
            Pending,
            Error(i32),
        }

        loop {
            let outcome = {
                let conn = match self.conns.get_mut(fd) {
                    Some(c) => c,
                    None => return Step::Closed,
                };
                if conn.write_done() {
                    Outcome::Done {
                        close: conn.close_after_write(),
                    }
                } else {
                    let pending = conn.pending_write();
                    let n = unsafe {
                        libc::send(
                            fd,
                            pending.as_ptr() as *const libc::c_void,
                            pending.len(),
                            libc::MSG_NOSIGNAL,
                        )
                    };
                    if n > 0 {
                        conn.advance_write(n as usize);
                        conn.touch();
                        continue;
                    }
                    match last_errno() {
                        libc::EAGAIN => Outcome::Pending,
                        libc::EINTR => continue,
                        errno => Outcome::Error(errno),
                    }
                }
            };

            match outcome {
                Outcome::Done { close } => {
                    self.metrics.response_written();
                    if close {
                        self.close_conn(fd);
                        return Step::Closed;
                    }
                    if let Some(conn) = self.conns.get_mut(fd) {
                        conn.reset_for_next_request();
                    }
                    let _ = self.poller.watch_readable(fd);
                    return Step::KeepAlive;
                }
                Outcome::Pending => {
                    let _ = self.poller.watch_writable(fd);
                    return Step::WritePending;
                }
                Outcome::Error(errno) => {
                    hdebug!(
                        "reactor {}: write error on fd {}: {}",
                        self.id,
                        fd,
                        std::io::Error::from_raw_os_error(errno)
                    );
                    self.close_conn(fd);
                    return Step::Closed;
                }
            }
        }
    }

    fn write_ready(&mut self, fd: i32) {
        match self.conns.get_mut(fd).map(|c| c.state()) {
            Some(ConnState::Writing) => {}
            _ => return,
        }
        if let Step::KeepAlive = self.flush(fd) {
            // Pipelined bytes may have been carried over the reset
            self.read_ready(fd);
        }
    }

    // ── Hand-back and housekeeping ──

    /// Deliver worker responses produced since the last epoll pass.
    fn drain_responses(&mut self) {
        while let Some(item) = self.responses.pop() {
            let live = match self.conns.get_mut(item.fd) {
                Some(c) => {
                    c.state() == ConnState::Dispatched && c.generation() == item.generation
                }
                None => false,
            };
            if !live {
                hdebug!(
                    "reactor {}: dropping response for stale fd {}",
                    self.id,
                    item.fd
                );
                continue;
            }
            if let Step::KeepAlive = self.respond(item.fd, item.response) {
                self.read_ready(item.fd);
            }
        }
    }

    /// Close connections quiet for longer than the idle timeout. Covers
    /// Slowloris-style half-sent requests as well as abandoned keep-alives.
    fn sweep_idle(&mut self) {
        for fd in self.conns.idle_fds(self.idle_timeout, Instant::now()) {
            hdebug!("reactor {}: closing idle fd {}", self.id, fd);
            self.close_conn(fd);
        }
    }

    fn close_conn(&mut self, fd: i32) {
        let _ = self.poller.delete(fd);
        if self.conns.remove(fd).is_some() {
            self.metrics.connection_closed();
        }
    }
}

fn wants_close(req: &Request) -> bool {
    req.header("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}
