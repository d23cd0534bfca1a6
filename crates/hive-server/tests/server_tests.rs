//! End-to-end tests driving a running server over real sockets.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::time::Duration;

use hive_http::{Method, Request, Response};
use hive_server::routes::RouteTable;
use hive_server::{AuthError, Claims, Config, RunningServer, Server, TokenVerifier, ValidationError};

const SECRET_TOKEN: &str = "open-sesame";

struct SecretVerifier;

impl TokenVerifier for SecretVerifier {
    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        if token == SECRET_TOKEN {
            Ok(Claims {
                subject: "itest".to_string(),
                expires_at: None,
            })
        } else {
            Err(AuthError::Invalid)
        }
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn demo_routes() -> RouteTable {
    let mut routes = RouteTable::new();
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
        .unwrap();
    routes
        .register(
            "/secure",
            Method::Get,
            None,
            Arc::new(|_req: &Request, resp: &mut Response| {
                resp.set_json(&serde_json::json!({ "status": "authorized" }));
                Ok(())
            }),
            true,
        )
        .unwrap();
    routes
        .register(
            "/slow",
            Method::Get,
            None,
            Arc::new(|_req: &Request, resp: &mut Response| {
                std::thread::sleep(Duration::from_millis(500));
                resp.set_text("done");
                Ok(())
            }),
            false,
        )
        .unwrap();
    routes
}

fn start_server(config: Config) -> RunningServer {
    hive_server::signal::ignore_sigpipe();
    Server::new(config, demo_routes(), Arc::new(SecretVerifier))
        .start()
        .unwrap()
}

fn base_config() -> Config {
    Config::default()
        .with_port(free_port())
        .with_io_threads(1)
        .with_workers(2)
        .with_queue_capacity(64)
        .with_pod_name("itest-pod")
        .with_cors_origins(vec!["https://app.example".to_string()])
}

fn connect(port: u16) -> TcpStream {
    let stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

/// Read one full response: status code, lowercased headers, body.
fn read_response(stream: &mut TcpStream) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 1024];

    let header_end = loop {
        if let Some(i) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break i + 4;
        }
        let n = stream.read(&mut tmp).unwrap();
        assert!(n > 0, "connection closed before response headers");
        buf.extend_from_slice(&tmp[..n]);
    };

    let head = std::str::from_utf8(&buf[..header_end - 4]).unwrap();
    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    let code: u16 = status_line.split(' ').nth(1).unwrap().parse().unwrap();

    let headers: Vec<(String, String)> = lines
        .map(|line| {
            let (name, value) = line.split_once(": ").unwrap();
            (name.to_ascii_lowercase(), value.to_string())
        })
        .collect();

    let content_length: usize = headers
        .iter()
        .find(|(n, _)| n == "content-length")
        .map(|(_, v)| v.parse().unwrap())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut tmp).unwrap();
        assert!(n > 0, "connection closed mid-body");
        buf.extend_from_slice(&tmp[..n]);
    }

    let body = buf[header_end..header_end + content_length].to_vec();
    (code, headers, body)
}

fn roundtrip(stream: &mut TcpStream, raw: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    stream.write_all(raw).unwrap();
    read_response(stream)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

#[test]
fn test_ping_and_keep_alive() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let (code, headers, body) = roundtrip(&mut stream, b"GET /ping HTTP/1.1\r\n\r\n");
    assert_eq!(code, 200);
    assert_eq!(header(&headers, "connection"), Some("keep-alive"));
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "OK");

    // Same connection serves a second request
    let (code, _, body) = roundtrip(&mut stream, b"GET /version HTTP/1.1\r\n\r\n");
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["pod"], "itest-pod");

    server.stop();
}

#[test]
fn test_metrics_snapshot() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    roundtrip(&mut stream, b"GET /ping HTTP/1.1\r\n\r\n");
    let (code, _, body) = roundtrip(&mut stream, b"GET /metrics HTTP/1.1\r\n\r\n");
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["requests_total"].as_u64().unwrap() >= 1);
    assert_eq!(json["io_threads"], 1);
    assert_eq!(json["connections_active"], 1);

    server.stop();
}

#[test]
fn test_echo_validator_scenario() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let good = b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 14\r\n\r\n{\"id\":\"ANATR\"}";
    let (code, _, body) = roundtrip(&mut stream, good);
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "ANATR");

    let bad = b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"id\":\"AN4T\"}";
    let (code, _, body) = roundtrip(&mut stream, bad);
    assert_eq!(code, 400);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "id must be 5 alphabetic characters");
    assert_eq!(json["field"], "id");

    server.stop();
}

#[test]
fn test_secure_route_auth() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let (code, _, _) = roundtrip(&mut stream, b"GET /secure HTTP/1.1\r\n\r\n");
    assert_eq!(code, 401);

    let (code, _, _) = roundtrip(
        &mut stream,
        b"GET /secure HTTP/1.1\r\nAuthorization: Bearer nope\r\n\r\n",
    );
    assert_eq!(code, 401);

    let raw = format!(
        "GET /secure HTTP/1.1\r\nAuthorization: Bearer {}\r\n\r\n",
        SECRET_TOKEN
    );
    let (code, _, body) = roundtrip(&mut stream, raw.as_bytes());
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "authorized");

    server.stop();
}

#[test]
fn test_cors_preflight() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let (code, headers, _) = roundtrip(
        &mut stream,
        b"OPTIONS /echo HTTP/1.1\r\nOrigin: https://app.example\r\n\r\n",
    );
    assert_eq!(code, 204);
    assert_eq!(
        header(&headers, "access-control-allow-origin"),
        Some("https://app.example")
    );

    let (code, headers, _) = roundtrip(
        &mut stream,
        b"OPTIONS /echo HTTP/1.1\r\nOrigin: https://evil.example\r\n\r\n",
    );
    assert_eq!(code, 403);
    assert!(header(&headers, "access-control-allow-origin").is_none());

    server.stop();
}

#[test]
fn test_fragmented_request_delivery() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let raw: &[u8] = b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 14\r\n\r\n{\"id\":\"BONAP\"}";
    for chunk in raw.chunks(11) {
        stream.write_all(chunk).unwrap();
        stream.flush().unwrap();
        std::thread::sleep(Duration::from_millis(20));
    }

    let (code, _, body) = read_response(&mut stream);
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "BONAP");

    server.stop();
}

#[test]
fn test_transfer_encoding_rejected_and_closed() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let (code, headers, _) = roundtrip(
        &mut stream,
        b"GET /ping HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n",
    );
    assert_eq!(code, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));

    // Server closed the connection after the 400
    let mut tmp = [0u8; 16];
    assert_eq!(stream.read(&mut tmp).unwrap(), 0);

    server.stop();
}

#[test]
fn test_unknown_route_404() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());
    let (code, _, _) = roundtrip(&mut stream, b"GET /no-such-thing HTTP/1.1\r\n\r\n");
    assert_eq!(code, 404);
    server.stop();
}

#[test]
fn test_backpressure_503_keeps_connection() {
    // One worker, queue of one: the third concurrent request must be
    // rejected with a 503 while its connection stays usable.
    let config = base_config().with_workers(1).with_queue_capacity(1);
    let server = start_server(config);

    let mut streams: Vec<TcpStream> = (0..4).map(|_| connect(server.port())).collect();
    for s in streams.iter_mut() {
        s.write_all(b"GET /slow HTTP/1.1\r\n\r\n").unwrap();
    }

    let mut codes = Vec::new();
    for s in streams.iter_mut() {
        let (code, _, _) = read_response(s);
        codes.push(code);
    }
    let ok = codes.iter().filter(|&&c| c == 200).count();
    let busy = codes.iter().filter(|&&c| c == 503).count();
    assert_eq!(ok + busy, 4, "unexpected codes: {:?}", codes);
    assert!(busy >= 1, "expected at least one 503: {:?}", codes);
    assert!(ok >= 2, "accepted tasks must still complete: {:?}", codes);

    // A rejected connection is still alive for the next request
    if let Some(idx) = codes.iter().position(|&c| c == 503) {
        let (code, _, _) = roundtrip(&mut streams[idx], b"GET /ping HTTP/1.1\r\n\r\n");
        assert_eq!(code, 200);
    }

    server.stop();
}

#[test]
fn test_request_exactly_at_cap_accepted() {
    let raw: &[u8] = b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 14\r\n\r\n{\"id\":\"ANATR\"}";
    let config = base_config().with_max_request_bytes(raw.len());
    let server = start_server(config);

    // A request filling the receive buffer to the last byte is still valid
    let mut stream = connect(server.port());
    let (code, _, body) = roundtrip(&mut stream, raw);
    assert_eq!(code, 200);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["id"], "ANATR");

    // Headers that overflow the cap without completing are rejected
    let mut stream = connect(server.port());
    let mut oversized = b"GET /ping HTTP/1.1\r\nX-Pad: ".to_vec();
    oversized.resize(raw.len() + 200, b'a');
    stream.write_all(&oversized).unwrap();
    let (code, headers, body) = read_response(&mut stream);
    assert_eq!(code, 400);
    assert_eq!(header(&headers, "connection"), Some("close"));
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "request too large");

    server.stop();
}

#[test]
fn test_idle_connection_swept() {
    let config = base_config().with_idle_timeout(Duration::from_secs(1));
    let server = start_server(config);
    let mut stream = connect(server.port());

    // Half a request, then silence: a Slowloris-style client
    stream.write_all(b"GET /ping HT").unwrap();

    let mut tmp = [0u8; 64];
    let n = stream.read(&mut tmp).unwrap();
    // No response bytes, just EOF once the sweep fires
    assert_eq!(n, 0);

    server.stop();
}

#[test]
fn test_connection_close_honored() {
    let server = start_server(base_config());
    let mut stream = connect(server.port());

    let raw = format!(
        "GET /secure HTTP/1.1\r\nAuthorization: Bearer {}\r\nConnection: close\r\n\r\n",
        SECRET_TOKEN
    );
    let (code, headers, _) = roundtrip(&mut stream, raw.as_bytes());
    assert_eq!(code, 200);
    assert_eq!(header(&headers, "connection"), Some("close"));

    let mut tmp = [0u8; 16];
    assert_eq!(stream.read(&mut tmp).unwrap(), 0);

    server.stop();
}
