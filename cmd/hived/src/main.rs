//! hived - the hive HTTP application server daemon
//!
//! Configuration is two-phase: environment variables first (HIVE_PORT,
//! HIVE_IO_THREADS, HIVE_WORKERS, ...), then CLI flags override.
//!
//! Usage:
//!     hived [--port 8080] [--io-threads 4] [--workers 16]
//!           [--queue-cap 1024] [--idle-timeout 60] [--cors ORIGIN,ORIGIN]
//!
//! The registered routes are a small demo surface; real deployments link
//! against hive-server and register their own.

use std::sync::Arc;
use std::time::Duration;

use hive_core::env::env_get_opt;
use hive_core::{herror, hinfo, hwarn};
use hive_http::{Method, Request, Response};
use hive_server::routes::RouteTable;
use hive_server::signal::{ignore_sigpipe, ShutdownSignal};
use hive_server::{AuthError, Claims, Config, Server, TokenVerifier, ValidationError};

/// Demo verifier: a single shared secret from HIVE_AUTH_SECRET. Real
/// deployments inject a JWT verifier here.
struct StaticSecretVerifier {
    secret: Option<String>,
}

impl TokenVerifier for StaticSecretVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        match &self.secret {
            Some(secret) if token == secret => Ok(Claims {
                subject: "demo".to_string(),
                expires_at: None,
            }),
            _ => Err(AuthError::Invalid),
        }
    }
}

fn usage() {
    eprintln!(
        "usage: hived [--port N] [--io-threads N] [--workers N] \
         [--queue-cap N] [--idle-timeout SECS] [--cors ORIGIN,ORIGIN]"
    );
}

/// CLI override phase on top of the env-var phase.
fn apply_cli_flags(mut config: Config, args: &[String]) -> Config {
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--port" | "-p" => {
                i += 1;
                if let Some(v) = args.get(i).and_then(|v| v.parse().ok()) {
                    config = config.with_port(v);
                }
            }
            "--io-threads" => {
                i += 1;
                if let Some(v) = args.get(i).and_then(|v| v.parse().ok()) {
                    config = config.with_io_threads(v);
                }
            }
            "--workers" | "-w" => {
                i += 1;
                if let Some(v) = args.get(i).and_then(|v| v.parse().ok()) {
                    config = config.with_workers(v);
                }
            }
            "--queue-cap" => {
                i += 1;
                if let Some(v) = args.get(i).and_then(|v| v.parse().ok()) {
                    config = config.with_queue_capacity(v);
                }
            }
            "--idle-timeout" => {
                i += 1;
                if let Some(v) = args.get(i).and_then(|v| v.parse().ok()) {
                    config = config.with_idle_timeout(Duration::from_secs(v));
                }
            }
            "--cors" => {
                i += 1;
                if let Some(v) = args.get(i) {
                    let origins = v
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect();
                    config = config.with_cors_origins(origins);
                }
            }
            "--help" | "-h" => {
                usage();
                std::process::exit(0);
            }
            other => {
                eprintln!("hived: unknown flag {:?}", other);
                usage();
                std::process::exit(2);
            }
        }
        i += 1;
    }
    config
}

fn demo_routes() -> RouteTable {
    let mut routes = RouteTable::new();

    // POST /echo {"id":"ANATR"} -> {"id":"ANATR"}; id must be 5 letters
    routes
        .register(
            "/echo",
            Method::Post,
            Some(Arc::new(|req: &Request| match req.param("id") {
                Some(id) if id.len() == 5 && id.chars().all(|c| c.is_ascii_alphabetic()) => Ok(()),
                _ => Err(ValidationError::new(
                    "id",
                    "id must be 5 alphabetic characters",
                )),
            })),
            Arc::new(|req: &Request, resp: &mut Response| {
                resp.set_json(&serde_json::json!({ "id": req.param("id") }));
                Ok(())
            }),
            false,
        )
        .expect("demo route registration");

    // GET /whoami with a valid bearer token
    routes
        .register(
            "/whoami",
            Method::Get,
            None,
            Arc::new(|_req: &Request, resp: &mut Response| {
                resp.set_json(&serde_json::json!({ "subject": "demo" }));
                Ok(())
            }),
            true,
        )
        .expect("demo route registration");

    // POST /upload (multipart): report what arrived
    routes
        .register(
            "/upload",
            Method::Post,
            None,
            Arc::new(|req: &Request, resp: &mut Response| {
                let files: Vec<serde_json::Value> = req
                    .files()
                    .iter()
                    .map(|part| {
                        serde_json::json!({
                            "name": part.name,
                            "filename": part.filename,
                            "bytes": req.file_data(part).len(),
                        })
                    })
                    .collect();
                resp.set_json(&serde_json::json!({ "files": files }));
                Ok(())
            }),
            false,
        )
        .expect("demo route registration");

    routes
}

fn main() {
    hive_core::log::init();

    let args: Vec<String> = std::env::args().collect();
    let config = apply_cli_flags(Config::from_env(), &args);

    let secret: Option<String> = env_get_opt("HIVE_AUTH_SECRET");
    if secret.is_none() {
        hwarn!("HIVE_AUTH_SECRET unset, secure routes will reject every token");
    }
    let verifier = Arc::new(StaticSecretVerifier { secret });

    hinfo!(
        "hived {}: port={} io_threads={} workers={} queue_cap={} idle_timeout={}s",
        config.version,
        config.port,
        config.io_threads,
        config.total_workers,
        config.queue_capacity,
        config.idle_timeout.as_secs()
    );

    let server = Server::new(config, demo_routes(), verifier);
    let metrics = server.metrics();
    let flag = server.shutdown_flag();

    ignore_sigpipe();
    // Block the shutdown signals while main is still the only thread, so
    // every later spawn inherits the mask. A thread with an unblocked
    // mask would take process-directed SIGTERM with default disposition
    // and kill the process before the signalfd ever fires.
    let mut signals = match ShutdownSignal::install() {
        Ok(s) => s,
        Err(e) => {
            herror!("hived: signal setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let running = match server.start() {
        Ok(r) => r,
        Err(e) => {
            herror!("hived: fatal startup error: {}", e);
            std::process::exit(1);
        }
    };

    // Periodic one-line stats until shutdown
    let stats = std::thread::Builder::new()
        .name("hive-stats".to_string())
        .spawn(move || {
            let mut last_report = std::time::Instant::now();
            while !flag.is_tripped() {
                std::thread::sleep(Duration::from_millis(500));
                if last_report.elapsed() >= Duration::from_secs(10) {
                    let snap = metrics.snapshot();
                    hinfo!(
                        "stats: req={} resp={} conns={} rejected={} rss_kb={}",
                        snap["requests_total"],
                        snap["responses_total"],
                        snap["connections_active"],
                        snap["queue_rejections"],
                        snap["memory_rss_kb"]
                    );
                    last_report = std::time::Instant::now();
                }
            }
        })
        .expect("failed to spawn stats thread");

    match signals.wait() {
        Some(signo) => hinfo!("signal {} received, shutting down", signo),
        None => herror!("signal wait failed, shutting down"),
    }
    running.stop();
    hinfo!("shutdown complete");
    let _ = stats.join();
}
