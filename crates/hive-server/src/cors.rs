//! CORS origin screening
//!
//! Resolved on the I/O thread before any routing. Preflight `OPTIONS`
//! requests are answered here; ordinary requests with a disallowed
//! `Origin` are refused with a 403 and empty CORS headers without ever
//! touching the route table. Requests without an `Origin` header pass
//! through untouched.

use hive_http::{Method, Request, Response, Status};

const ALLOW_METHODS: &str = "GET, POST, OPTIONS";
const ALLOW_HEADERS: &str = "Content-Type, Authorization, X-Request-ID";
const MAX_AGE_SECS: &str = "600";

pub struct CorsPolicy {
    origins: Vec<String>,
}

impl CorsPolicy {
    /// `origins` is the configured allow-list; a literal `*` entry allows
    /// any origin. An empty list refuses all cross-origin traffic.
    pub fn new(origins: Vec<String>) -> Self {
        Self { origins }
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.origins.iter().any(|o| o == "*" || o == origin)
    }

    /// Screen a request before routing. `Some` is a final response to
    /// write immediately; `None` lets the request proceed.
    pub fn screen(&self, req: &Request) -> Option<Response> {
        let origin = req.header("origin");

        if req.method() == Method::Options {
            return Some(match origin {
                Some(o) if self.is_allowed(o) => {
                    let mut resp = Response::new();
                    resp.set_status(Status::NoContent);
                    resp.set_header("Access-Control-Allow-Origin", o);
                    resp.set_header("Access-Control-Allow-Methods", ALLOW_METHODS);
                    resp.set_header("Access-Control-Allow-Headers", ALLOW_HEADERS);
                    resp.set_header("Access-Control-Max-Age", MAX_AGE_SECS);
                    resp
                }
                Some(_) => Response::error(Status::Forbidden, "origin not allowed"),
                // OPTIONS without an Origin is not a preflight; answer
                // with the supported method set
                None => {
                    let mut resp = Response::new();
                    resp.set_status(Status::NoContent);
                    resp.set_header("Allow", ALLOW_METHODS);
                    resp
                }
            });
        }

        match origin {
            Some(o) if !self.is_allowed(o) => {
                Some(Response::error(Status::Forbidden, "origin not allowed"))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_http::RequestParser;

    fn request(method: &str, origin: Option<&str>) -> Request {
        let raw = match origin {
            Some(o) => format!("{} /x HTTP/1.1\r\nOrigin: {}\r\n\r\n", method, o),
            None => format!("{} /x HTTP/1.1\r\n\r\n", method),
        }
        .into_bytes();
        let mut parser = RequestParser::new();
        assert!(parser.is_complete(&raw, 1 << 20).unwrap());
        parser
            .finalize(raw.into_boxed_slice(), "127.0.0.1".parse().unwrap())
            .unwrap()
    }

    fn policy() -> CorsPolicy {
        CorsPolicy::new(vec!["https://app.example".to_string()])
    }

    #[test]
    fn test_preflight_allowed_origin() {
        let resp = policy()
            .screen(&request("OPTIONS", Some("https://app.example")))
            .unwrap();
        assert_eq!(resp.status(), Status::NoContent);
        assert_eq!(
            resp.header("Access-Control-Allow-Origin"),
            Some("https://app.example")
        );
        assert_eq!(
            resp.header("Access-Control-Allow-Methods"),
            Some(ALLOW_METHODS)
        );
    }

    #[test]
    fn test_preflight_disallowed_origin() {
        let resp = policy()
            .screen(&request("OPTIONS", Some("https://evil.example")))
            .unwrap();
        assert_eq!(resp.status(), Status::Forbidden);
        assert!(resp.header("Access-Control-Allow-Origin").is_none());
    }

    #[test]
    fn test_plain_request_disallowed_origin() {
        let resp = policy()
            .screen(&request("GET", Some("https://evil.example")))
            .unwrap();
        assert_eq!(resp.status(), Status::Forbidden);
    }

    #[test]
    fn test_no_origin_passes_through() {
        assert!(policy().screen(&request("GET", None)).is_none());
        assert!(policy()
            .screen(&request("GET", Some("https://app.example")))
            .is_none());
    }

    #[test]
    fn test_wildcard_allows_any() {
        let policy = CorsPolicy::new(vec!["*".to_string()]);
        assert!(policy.is_allowed("https://anything.example"));
        assert!(policy
            .screen(&request("GET", Some("https://anything.example")))
            .is_none());
    }

    #[test]
    fn test_empty_list_refuses_all() {
        let policy = CorsPolicy::new(Vec::new());
        assert!(!policy.is_allowed("https://app.example"));
    }
}
