//! Bearer token extraction and verification seam
//!
//! The engine only knows how to pull a token out of the `Authorization`
//! header and ask a `TokenVerifier` about it. Signature schemes, expiry
//! policy and claim shapes belong to the verifier implementation injected
//! at startup.

use core::fmt;

use hive_http::Request;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No `Authorization` header on a secure route.
    Missing,
    /// Header present but not `Bearer <token>`.
    Malformed,
    /// Token failed verification.
    Invalid,
    /// Token verified but past its expiry.
    Expired,
}

impl AuthError {
    /// Body text for the 401 response.
    pub fn message(&self) -> &'static str {
        match self {
            AuthError::Missing => "authorization required",
            AuthError::Malformed => "malformed authorization header",
            AuthError::Invalid => "invalid token",
            AuthError::Expired => "token expired",
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for AuthError {}

/// Claims carried by a verified token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claims {
    pub subject: String,
    /// Unix seconds; verifiers without expiry semantics leave this unset.
    pub expires_at: Option<u64>,
}

/// Token verification seam, injected process-wide at startup.
pub trait TokenVerifier: Send + Sync {
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// Extract the bearer token from a request's `Authorization` header.
pub fn bearer_token(req: &Request) -> Result<&str, AuthError> {
    let header = req.header("authorization").ok_or(AuthError::Missing)?;
    let token = header.strip_prefix("Bearer ").ok_or(AuthError::Malformed)?;
    let token = token.trim();
    if token.is_empty() {
        return Err(AuthError::Malformed);
    }
    Ok(token)
}

/// Full secure-route check: extraction then verification.
pub fn authorize(req: &Request, verifier: &dyn TokenVerifier) -> Result<Claims, AuthError> {
    verifier.verify(bearer_token(req)?)
}
