//! Finalized request
//!
//! Immutable once built by `RequestParser::finalize`. The request owns the
//! backing byte buffer (moved out of the connection), so body and file-part
//! views stay valid for as long as the request is alive - including while a
//! worker thread holds it behind an `Arc`.

use std::net::IpAddr;
use std::ops::Range;

use serde_json::Value;

/// The three methods this server accepts. Anything else is rejected while
/// the request is still streaming in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Options,
}

impl Method {
    /// Identify the method from the first bytes of the request line.
    /// `None` means unsupported, which is terminal for the connection.
    pub fn from_bytes(b: &[u8]) -> Option<Method> {
        match b {
            b"GET" => Some(Method::Get),
            b"POST" => Some(Method::Post),
            b"OPTIONS" => Some(Method::Options),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Options => "OPTIONS",
        }
    }
}

/// One uploaded file from a multipart body. Content is a view into the
/// request's backing buffer, resolved via `Request::file_data`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub name: String,
    pub filename: String,
    pub content_type: Option<String>,
    pub(crate) data: Range<usize>,
}

/// An immutable, fully-parsed HTTP request.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    /// Header names stored lowercased; values verbatim.
    pub(crate) headers: Vec<(String, String)>,
    /// Merged from URL query and form/JSON body.
    pub(crate) params: Vec<(String, String)>,
    pub(crate) payload: Option<Value>,
    pub(crate) body: Option<Range<usize>>,
    pub(crate) files: Vec<FilePart>,
    pub(crate) remote_ip: IpAddr,
    /// Backing buffer, moved from the parser at finalize.
    pub(crate) bytes: Box<[u8]>,
}

impl Request {
    #[inline]
    pub fn method(&self) -> Method {
        self.method
    }

    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    /// First header value with case-insensitive name matching. Linear
    /// search; requests carry few headers.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parameter from whichever source matched: URL query, JSON body
    /// scalar, or multipart form field.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    /// Decoded JSON payload for `application/json` bodies.
    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }

    /// Raw body bytes, when a body was present.
    pub fn body(&self) -> Option<&[u8]> {
        self.body.clone().map(|r| &self.bytes[r])
    }

    pub fn files(&self) -> &[FilePart] {
        &self.files
    }

    /// Content bytes of a multipart file part.
    pub fn file_data(&self, part: &FilePart) -> &[u8] {
        &self.bytes[part.data.clone()]
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers.len())
            .field("params", &self.params.len())
            .field("files", &self.files.len())
            .field("remote_ip", &self.remote_ip)
            .finish()
    }
}
