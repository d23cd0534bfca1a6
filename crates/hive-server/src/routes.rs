//! Route table and handler error taxonomy
//!
//! Populated once at startup, read-only afterwards, so workers on every
//! reactor can look paths up concurrently without a lock. Registration
//! validates paths eagerly; a bad route is a programming error caught at
//! boot, never at request time.

use core::fmt;
use std::collections::HashMap;
use std::sync::Arc;

use hive_http::{Method, Request, Response, Status};

/// Precondition failure reported by a route's validator. Short-circuits
/// to a 400 with a structured field/message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &str, message: &str) -> Self {
        Self {
            field: field.to_string(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

/// Errors a handler may return. Recognized domain kinds map to specific
/// status codes; everything else is a 500.
#[derive(Debug)]
pub enum HandlerError {
    Validation(ValidationError),
    /// Request payload decoded but had the wrong shape.
    BadJson(String),
    /// A downstream call (database, outbound HTTP) failed.
    Downstream(String),
    Internal(String),
}

impl HandlerError {
    pub fn status(&self) -> Status {
        match self {
            HandlerError::Validation(_) | HandlerError::BadJson(_) => Status::BadRequest,
            HandlerError::Downstream(_) | HandlerError::Internal(_) => Status::InternalError,
        }
    }

    /// Build the error response body for this failure.
    pub fn to_response(&self) -> Response {
        match self {
            HandlerError::Validation(ve) => {
                let mut resp = Response::new();
                resp.set_status(Status::BadRequest);
                resp.set_json(&serde_json::json!({
                    "error": ve.message,
                    "field": ve.field,
                }));
                resp
            }
            HandlerError::BadJson(msg) => Response::error(Status::BadRequest, msg),
            // Downstream detail is logged, not leaked to the caller
            HandlerError::Downstream(_) => {
                Response::error(Status::InternalError, "upstream dependency failed")
            }
            HandlerError::Internal(_) => Response::error(Status::InternalError, "internal error"),
        }
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerError::Validation(ve) => write!(f, "validation failed: {}", ve),
            HandlerError::BadJson(msg) => write!(f, "bad json: {}", msg),
            HandlerError::Downstream(msg) => write!(f, "downstream failure: {}", msg),
            HandlerError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for HandlerError {}

impl From<ValidationError> for HandlerError {
    fn from(ve: ValidationError) -> Self {
        HandlerError::Validation(ve)
    }
}

pub type Validator = Arc<dyn Fn(&Request) -> Result<(), ValidationError> + Send + Sync>;
pub type Handler = Arc<dyn Fn(&Request, &mut Response) -> Result<(), HandlerError> + Send + Sync>;

/// Rejected registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    BadPath { path: String, reason: &'static str },
    Duplicate { path: String },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::BadPath { path, reason } => {
                write!(f, "invalid route path {:?}: {}", path, reason)
            }
            RouteError::Duplicate { path } => write!(f, "route {:?} already registered", path),
        }
    }
}

impl std::error::Error for RouteError {}

pub struct RouteEntry {
    pub method: Method,
    pub validator: Option<Validator>,
    pub handler: Handler,
    /// Requires a verified bearer token.
    pub secure: bool,
}

/// Path-keyed route registry. Exact-match lookup only.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        path: &str,
        method: Method,
        validator: Option<Validator>,
        handler: Handler,
        secure: bool,
    ) -> Result<(), RouteError> {
        if let Err(reason) = validate_path(path) {
            return Err(RouteError::BadPath {
                path: path.to_string(),
                reason,
            });
        }
        if self.routes.contains_key(path) {
            return Err(RouteError::Duplicate {
                path: path.to_string(),
            });
        }
        self.routes.insert(
            path.to_string(),
            RouteEntry {
                method,
                validator,
                handler,
                secure,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, path: &str) -> Option<&RouteEntry> {
        self.routes.get(path)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Leading `/`, no trailing `/` (the bare root excepted), restricted
/// character set.
fn validate_path(path: &str) -> Result<(), &'static str> {
    if !path.starts_with('/') {
        return Err("must start with '/'");
    }
    if path.len() > 1 && path.ends_with('/') {
        return Err("must not end with '/'");
    }
    let ok = path
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'/' | b'_' | b'-' | b'.'));
    if !ok {
        return Err("contains characters outside [a-zA-Z0-9/_-.]");
    }
    Ok(())
}
