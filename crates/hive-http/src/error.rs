//! Parse error taxonomy
//!
//! Every variant is a protocol-level defect in the incoming bytes. The
//! policy is uniform: respond 400 and close the connection. Errors are
//! values returned from the completeness check or `finalize`; the parser
//! never panics across partially-consumed state.

use core::fmt;

/// Result type for parser operations
pub type ParseResult<T> = Result<T, ParseError>;

/// Why a request was rejected at the protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Request line is not `METHOD SP path SP HTTP/1.x`
    InvalidRequestLine,

    /// Method is not GET, POST or OPTIONS
    UnsupportedMethod,

    /// Header line without a colon, empty name, or a name byte outside
    /// the RFC 7230 token set
    InvalidHeader,

    /// CR or LF embedded in a header value (response-splitting attempt)
    HeaderInjection,

    /// Any `Transfer-Encoding` header - chunked bodies are unsupported
    TransferEncoding,

    /// More than one `Host` header (request-smuggling guard)
    DuplicateHost,

    /// POST without a parseable `Content-Length`
    InvalidContentLength,

    /// Declared body would exceed the receive buffer cap
    BodyTooLarge { declared: usize, limit: usize },

    /// POST body with a Content-Type other than application/json or
    /// multipart/form-data
    UnsupportedContentType,

    /// Body declared application/json but did not decode
    BadJson,

    /// Malformed multipart framing or part headers
    BadMultipart,
}

impl ParseError {
    /// Short message suitable for the 400 response body.
    pub fn message(&self) -> &'static str {
        match self {
            ParseError::InvalidRequestLine => "malformed request line",
            ParseError::UnsupportedMethod => "method not supported",
            ParseError::InvalidHeader => "malformed header",
            ParseError::HeaderInjection => "illegal character in header value",
            ParseError::TransferEncoding => "transfer-encoding not supported",
            ParseError::DuplicateHost => "duplicate host header",
            ParseError::InvalidContentLength => "missing or invalid content-length",
            ParseError::BodyTooLarge { .. } => "request body too large",
            ParseError::UnsupportedContentType => "unsupported content-type",
            ParseError::BadJson => "request body is not valid json",
            ParseError::BadMultipart => "malformed multipart body",
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::BodyTooLarge { declared, limit } => {
                write!(f, "request body too large: {} > {} bytes", declared, limit)
            }
            other => f.write_str(other.message()),
        }
    }
}

impl std::error::Error for ParseError {}
