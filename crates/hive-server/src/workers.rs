//! Worker pool and task execution
//!
//! Each reactor owns one pool of W worker threads. Every worker has its
//! own bounded queue (no shared-queue contention); the reactor assigns
//! tasks round-robin with an atomic cursor. Workers never touch sockets:
//! a finished response goes onto the reactor's lock-free response queue
//! and the reactor writes it out on the owning I/O thread.
//!
//! A panicking handler is caught at the dispatch boundary and becomes a
//! 500; the worker thread and the connection both survive.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_queue::ArrayQueue;
use hive_core::log;
use hive_core::queue::{PushError, TaskQueue};
use hive_core::ServerMetrics;
use hive_core::{hdebug, herror};
use hive_http::{Request, Response, Status};

use crate::auth::{authorize, TokenVerifier};
use crate::conn::Generation;
use crate::cors::CorsPolicy;
use crate::routes::{HandlerError, RouteTable};

/// Unit of dispatch: one finalized request bound for one connection.
#[derive(Debug)]
pub struct Task {
    pub fd: i32,
    pub generation: Generation,
    pub request: Arc<Request>,
}

/// Unit of hand-back: a completed response for a connection, tagged with
/// the generation observed at dispatch so stale fds are never written.
pub struct ResponseItem {
    pub fd: i32,
    pub generation: Generation,
    pub response: Response,
}

/// Everything task execution needs, shared by all workers of a reactor.
pub struct WorkerContext {
    pub routes: Arc<RouteTable>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub cors: Arc<CorsPolicy>,
    pub metrics: Arc<ServerMetrics>,
    pub responses: Arc<ArrayQueue<ResponseItem>>,
}

pub struct WorkerPool {
    queues: Vec<Arc<TaskQueue<Task>>>,
    cursor: AtomicUsize,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `count` workers, each blocking on its own queue.
    pub fn start(
        reactor_id: usize,
        count: usize,
        queue_capacity: usize,
        ctx: Arc<WorkerContext>,
    ) -> Self {
        let mut queues = Vec::with_capacity(count);
        let mut handles = Vec::with_capacity(count);

        for wid in 0..count {
            let queue = Arc::new(TaskQueue::new(queue_capacity));
            queues.push(queue.clone());
            let ctx = ctx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("hive-r{}-w{}", reactor_id, wid))
                .spawn(move || worker_loop(queue, ctx))
                .expect("failed to spawn worker thread");
            handles.push(handle);
        }

        Self {
            queues,
            cursor: AtomicUsize::new(0),
            handles,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.queues.len()
    }

    /// Round-robin a task onto the next worker's queue. A full queue is a
    /// backpressure signal, not a fault: the task comes back to the caller
    /// for the 503 path.
    pub fn dispatch(&self, task: Task) -> Result<(), PushError<Task>> {
        let i = self.cursor.fetch_add(1, Ordering::Relaxed) % self.queues.len();
        self.queues[i].try_push(task)
    }

    /// Stop every queue (waking blocked workers) and join the threads.
    /// Queued tasks are still executed before the workers exit.
    pub fn stop(self) {
        for q in &self.queues {
            q.stop();
        }
        for h in self.handles {
            let _ = h.join();
        }
    }
}

fn worker_loop(queue: Arc<TaskQueue<Task>>, ctx: Arc<WorkerContext>) {
    let mut batch = Vec::new();
    while let Some(task) = queue.pop() {
        run_task(task, &ctx);
        // Everything queued behind it comes out under one lock
        queue.drain_into(&mut batch);
        for task in batch.drain(..) {
            run_task(task, &ctx);
        }
    }
    hdebug!("worker {} exiting", std::thread::current().name().unwrap_or("?"));
}

fn run_task(task: Task, ctx: &WorkerContext) {
    let fd = task.fd;
    let generation = task.generation;
    let response = execute(&task, ctx);
    if ctx
        .responses
        .push(ResponseItem {
            fd,
            generation,
            response,
        })
        .is_err()
    {
        // Queue is sized for worst-case in-flight count; hitting this
        // means a sizing bug, and the connection will idle out
        herror!("response queue overflow, dropping response for fd {}", fd);
    }
}

/// Run one task: request-id scope, route resolution, auth, validation,
/// handler, latency, keep-alive and CORS response headers.
fn execute(task: &Task, ctx: &WorkerContext) -> Response {
    if let Some(rid) = task.request.header("x-request-id") {
        log::set_request_scope(rid);
    }

    let started = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| route_request(&task.request, ctx)));
    let mut response = match result {
        Ok(resp) => resp,
        Err(_) => {
            herror!(
                "handler panicked: {} {}",
                task.request.method().as_str(),
                task.request.path()
            );
            Response::error(Status::InternalError, "internal error")
        }
    };
    ctx.metrics.record_latency(started.elapsed());

    if wants_close(&task.request) {
        response.set_close(true);
    }
    if let Some(origin) = task.request.header("origin") {
        if ctx.cors.is_allowed(origin) {
            response.set_header("Access-Control-Allow-Origin", origin);
        }
    }

    log::clear_request_scope();
    response
}

fn wants_close(req: &Request) -> bool {
    req.header("connection")
        .map(|v| v.eq_ignore_ascii_case("close"))
        .unwrap_or(false)
}

fn route_request(req: &Request, ctx: &WorkerContext) -> Response {
    let entry = match ctx.routes.lookup(req.path()) {
        Some(e) => e,
        None => return Response::error(Status::NotFound, "no such route"),
    };

    if entry.method != req.method() {
        return Response::error(Status::BadRequest, "method not allowed for this route");
    }

    if entry.secure {
        if let Err(e) = authorize(req, ctx.verifier.as_ref()) {
            hdebug!("auth rejected for {}: {}", req.path(), e);
            return Response::error(Status::Unauthorized, e.message());
        }
    }

    if let Some(validator) = &entry.validator {
        if let Err(ve) = validator(req) {
            return HandlerError::Validation(ve).to_response();
        }
    }

    let mut response = Response::new();
    match (entry.handler)(req, &mut response) {
        Ok(()) => response,
        Err(e) => {
            herror!("handler error for {} {}: {}", req.method().as_str(), req.path(), e);
            e.to_response()
        }
    }
}
