//! # hive-http
//!
//! The HTTP/1.1 layer of the hive server: a streaming request parser that
//! is fed arbitrarily-fragmented byte streams, the immutable `Request` it
//! finalizes into, and the `Response` builder the reactor serializes back
//! onto the wire.
//!
//! Scope is deliberately narrow: GET/POST/OPTIONS only, bodies must be
//! `application/json` or `multipart/form-data`, `Transfer-Encoding` is
//! rejected outright. TLS, HTTP/2 and chunked bodies are an upstream
//! proxy's problem.
//!
//! ## Modules
//!
//! - `error` - typed parse failures (every one maps to a 400)
//! - `request` - finalized, immutable request with owned backing bytes
//! - `response` - status/header/body builder + wire serialization
//! - `parser` - the incremental completeness check and one-shot finalizer

pub mod error;
pub mod parser;
pub mod request;
pub mod response;

pub use error::ParseError;
pub use parser::RequestParser;
pub use request::{FilePart, Method, Request};
pub use response::{Response, Status};
