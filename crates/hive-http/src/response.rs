//! Response builder and wire serialization
//!
//! Handlers mutate a `Response` in place; the reactor serializes it with
//! `to_bytes` and owns the write-out. `Connection` reflects the keep-alive
//! decision made per request.

use serde_json::Value;

/// Status codes the server actually emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    NoContent,
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    InternalError,
    ServiceUnavailable,
}

impl Status {
    pub fn code(&self) -> u16 {
        match self {
            Status::Ok => 200,
            Status::NoContent => 204,
            Status::BadRequest => 400,
            Status::Unauthorized => 401,
            Status::Forbidden => 403,
            Status::NotFound => 404,
            Status::InternalError => 500,
            Status::ServiceUnavailable => 503,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::NoContent => "No Content",
            Status::BadRequest => "Bad Request",
            Status::Unauthorized => "Unauthorized",
            Status::Forbidden => "Forbidden",
            Status::NotFound => "Not Found",
            Status::InternalError => "Internal Server Error",
            Status::ServiceUnavailable => "Service Unavailable",
        }
    }
}

/// A response under construction.
#[derive(Debug)]
pub struct Response {
    status: Status,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    close: bool,
}

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl Response {
    pub fn new() -> Self {
        Self {
            status: Status::Ok,
            headers: Vec::new(),
            body: Vec::new(),
            close: false,
        }
    }

    /// Shorthand for an error response with a `{"error": ...}` body.
    pub fn error(status: Status, message: &str) -> Self {
        let mut resp = Self::new();
        resp.set_status(status);
        resp.set_json(&serde_json::json!({ "error": message }));
        resp
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = status;
    }

    /// Set a header, replacing any previous value of the same name.
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let Some(h) = self
            .headers
            .iter_mut()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            h.1 = value.to_string();
        } else {
            self.headers.push((name.to_string(), value.to_string()));
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set a JSON body (and content type).
    pub fn set_json(&mut self, value: &Value) {
        self.set_header("Content-Type", "application/json");
        self.body = value.to_string().into_bytes();
    }

    /// Set a plain-text body.
    pub fn set_text(&mut self, text: &str) {
        self.set_header("Content-Type", "text/plain");
        self.body = text.as_bytes().to_vec();
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Mark the connection for close after this response drains.
    pub fn set_close(&mut self, close: bool) {
        self.close = close;
    }

    #[inline]
    pub fn is_close(&self) -> bool {
        self.close
    }

    /// Serialize: status line, headers, Content-Length, Connection, body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128 + self.body.len());
        out.extend_from_slice(
            format!("HTTP/1.1 {} {}\r\n", self.status.code(), self.status.reason()).as_bytes(),
        );
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{}: {}\r\n", name, value).as_bytes());
        }
        out.extend_from_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        let conn = if self.close { "close" } else { "keep-alive" };
        out.extend_from_slice(format!("Connection: {}\r\nServer: hived\r\n\r\n", conn).as_bytes());
        out.extend_from_slice(&self.body);
        out
    }
}
