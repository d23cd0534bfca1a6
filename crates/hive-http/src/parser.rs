//! Streaming request parser
//!
//! Operates incrementally as bytes arrive; never assumes a full request is
//! available in one read. The reactor drives it with repeated
//! `is_complete` checks against the connection's receive buffer, then
//! calls `finalize` exactly once (enforced by move) to produce the
//! immutable `Request`.
//!
//! Completeness rules:
//! - the header terminator `\r\n\r\n` has been located,
//! - the method has been identified from the request line, and
//! - for POST, a valid `Content-Length` was found and the buffer already
//!   holds header-bytes + content-length bytes.
//!
//! GET/OPTIONS are complete as soon as headers end. Every malformed input
//! is a typed `ParseError`; the caller responds 400 and closes.

use std::net::IpAddr;
use std::ops::Range;

use crate::error::{ParseError, ParseResult};
use crate::request::{FilePart, Method, Request};

/// RFC 7230 token bytes, the only bytes legal in a header name.
#[inline]
fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Split a header block (terminator already stripped) into `\r\n` lines.
fn crlf_lines(head: &[u8]) -> Vec<&[u8]> {
    let mut lines = Vec::new();
    let mut rest = head;
    while let Some(i) = find_subsequence(rest, b"\r\n") {
        lines.push(&rest[..i]);
        rest = &rest[i + 2..];
    }
    lines.push(rest);
    lines
}

/// Incremental parser state for one request on one connection.
///
/// Progress already made (terminator position, method, content length) is
/// cached so re-checks after every read do not rescan from the start.
#[derive(Default)]
pub struct RequestParser {
    /// Index just past `\r\n\r\n` once located.
    header_end: Option<usize>,
    /// Resume point for the terminator scan.
    scan_pos: usize,
    method: Option<Method>,
    content_length: Option<usize>,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Can this request be finalized yet? `limit` is the receive-buffer
    /// cap; a Content-Length that could never fit fails here, before the
    /// body is buffered.
    pub fn is_complete(&mut self, bytes: &[u8], limit: usize) -> ParseResult<bool> {
        let header_end = match self.header_end {
            Some(e) => e,
            None => {
                // Resume the scan a few bytes back in case the terminator
                // straddled the previous read boundary.
                let from = self.scan_pos.saturating_sub(3);
                match find_subsequence(&bytes[from..], b"\r\n\r\n") {
                    Some(i) => {
                        let e = from + i + 4;
                        self.header_end = Some(e);
                        e
                    }
                    None => {
                        self.scan_pos = bytes.len();
                        return Ok(false);
                    }
                }
            }
        };

        let method = match self.method {
            Some(m) => m,
            None => {
                let line_end =
                    find_subsequence(&bytes[..header_end], b"\r\n").unwrap_or(header_end);
                let sp = bytes[..line_end]
                    .iter()
                    .position(|&b| b == b' ')
                    .ok_or(ParseError::InvalidRequestLine)?;
                let m = Method::from_bytes(&bytes[..sp]).ok_or(ParseError::UnsupportedMethod)?;
                self.method = Some(m);
                m
            }
        };

        if method != Method::Post {
            return Ok(true);
        }

        let content_length = match self.content_length {
            Some(n) => n,
            None => {
                let n = content_length_of(&bytes[..header_end])?;
                if header_end + n > limit {
                    return Err(ParseError::BodyTooLarge {
                        declared: n,
                        limit,
                    });
                }
                self.content_length = Some(n);
                n
            }
        };

        Ok(bytes.len() >= header_end + content_length)
    }

    /// Total bytes this request occupies (headers + declared body). Only
    /// meaningful once `is_complete` returned true; bytes past this point
    /// belong to the next pipelined request.
    pub fn request_len(&self) -> usize {
        self.header_end.unwrap_or(0) + self.content_length.unwrap_or(0)
    }

    /// Re-parse the full request and build the immutable `Request`, which
    /// takes ownership of `bytes`. Consumes the parser: finalize runs at
    /// most once per request.
    pub fn finalize(self, bytes: Box<[u8]>, remote_ip: IpAddr) -> ParseResult<Request> {
        let header_end = self.header_end.ok_or(ParseError::InvalidRequestLine)?;
        let head = &bytes[..header_end - 4];
        let lines = crlf_lines(head);

        let (method, path, mut params) = parse_request_line(lines[0])?;

        let mut headers: Vec<(String, String)> = Vec::with_capacity(lines.len() - 1);
        let mut host_seen = false;
        for line in &lines[1..] {
            let (name, value) = parse_header_line(line)?;
            if name == "transfer-encoding" {
                return Err(ParseError::TransferEncoding);
            }
            if name == "host" {
                if host_seen {
                    return Err(ParseError::DuplicateHost);
                }
                host_seen = true;
            }
            headers.push((name, value));
        }

        let mut payload = None;
        let mut files = Vec::new();
        let mut body = None;

        if method == Method::Post {
            let content_length = self.content_length.ok_or(ParseError::InvalidContentLength)?;
            if content_length > 0 {
                let range = header_end..header_end + content_length;
                if bytes.len() < range.end {
                    return Err(ParseError::InvalidContentLength);
                }
                let content_type = headers
                    .iter()
                    .find(|(n, _)| n == "content-type")
                    .map(|(_, v)| v.as_str())
                    .ok_or(ParseError::UnsupportedContentType)?;

                if content_type.starts_with("application/json") {
                    let value: serde_json::Value =
                        serde_json::from_slice(&bytes[range.clone()])
                            .map_err(|_| ParseError::BadJson)?;
                    merge_json_params(&value, &mut params);
                    payload = Some(value);
                } else if content_type.starts_with("multipart/form-data") {
                    let boundary = multipart_boundary(content_type)
                        .ok_or(ParseError::BadMultipart)?
                        .to_string();
                    parse_multipart(&bytes, range.clone(), &boundary, &mut params, &mut files)?;
                } else {
                    return Err(ParseError::UnsupportedContentType);
                }
                body = Some(range);
            }
        }

        Ok(Request {
            method,
            path,
            headers,
            params,
            payload,
            body,
            files,
            remote_ip,
            bytes,
        })
    }
}

/// `METHOD SP path[?query] SP HTTP/1.x` - nothing more, nothing less.
fn parse_request_line(line: &[u8]) -> ParseResult<(Method, String, Vec<(String, String)>)> {
    let mut parts = line.split(|&b| b == b' ');
    let method_b = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let target = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    let version = parts.next().ok_or(ParseError::InvalidRequestLine)?;
    if parts.next().is_some() {
        return Err(ParseError::InvalidRequestLine);
    }

    let method = Method::from_bytes(method_b).ok_or(ParseError::UnsupportedMethod)?;
    if !version.starts_with(b"HTTP/1.") {
        return Err(ParseError::InvalidRequestLine);
    }
    if target.first() != Some(&b'/') {
        return Err(ParseError::InvalidRequestLine);
    }

    let target = std::str::from_utf8(target).map_err(|_| ParseError::InvalidRequestLine)?;
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (target, None),
    };

    let mut params = Vec::new();
    if let Some(query) = query {
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            match pair.split_once('=') {
                Some((k, v)) => params.push((k.to_string(), v.to_string())),
                None => params.push((pair.to_string(), String::new())),
            }
        }
    }

    Ok((method, path.to_string(), params))
}

/// One header line: token name, colon, optional-whitespace value. The
/// value may not contain CR or LF (response-splitting guard).
fn parse_header_line(line: &[u8]) -> ParseResult<(String, String)> {
    let colon = line
        .iter()
        .position(|&b| b == b':')
        .ok_or(ParseError::InvalidHeader)?;
    let name = &line[..colon];
    if name.is_empty() || !name.iter().all(|&b| is_token_byte(b)) {
        return Err(ParseError::InvalidHeader);
    }

    let mut value = &line[colon + 1..];
    while value.first() == Some(&b' ') || value.first() == Some(&b'\t') {
        value = &value[1..];
    }
    while value.last() == Some(&b' ') || value.last() == Some(&b'\t') {
        value = &value[..value.len() - 1];
    }
    if value.iter().any(|&b| b == b'\r' || b == b'\n') {
        return Err(ParseError::HeaderInjection);
    }

    // Token bytes are ASCII, so the name is valid UTF-8 by construction.
    let name = std::str::from_utf8(name)
        .map_err(|_| ParseError::InvalidHeader)?
        .to_ascii_lowercase();
    let value = String::from_utf8(value.to_vec()).map_err(|_| ParseError::InvalidHeader)?;
    Ok((name, value))
}

/// Extract Content-Length from a raw header block during the completeness
/// check. POST without one can never complete, so absence is an error.
fn content_length_of(head: &[u8]) -> ParseResult<usize> {
    for line in crlf_lines(head).iter().skip(1) {
        if let Some(colon) = line.iter().position(|&b| b == b':') {
            if line[..colon].eq_ignore_ascii_case(b"content-length") {
                let value = std::str::from_utf8(&line[colon + 1..])
                    .map_err(|_| ParseError::InvalidContentLength)?;
                return value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| ParseError::InvalidContentLength);
            }
        }
    }
    Err(ParseError::InvalidContentLength)
}

/// Top-level JSON scalars become parameters; nested values stay reachable
/// through the payload handle only.
fn merge_json_params(value: &serde_json::Value, params: &mut Vec<(String, String)>) {
    if let serde_json::Value::Object(map) = value {
        for (k, v) in map {
            match v {
                serde_json::Value::String(s) => params.push((k.clone(), s.clone())),
                serde_json::Value::Number(n) => params.push((k.clone(), n.to_string())),
                serde_json::Value::Bool(b) => params.push((k.clone(), b.to_string())),
                _ => {}
            }
        }
    }
}

/// `boundary=` parameter of a multipart/form-data content type.
fn multipart_boundary(content_type: &str) -> Option<&str> {
    for param in content_type.split(';').map(str::trim) {
        if let Some(value) = param.strip_prefix("boundary=") {
            return Some(value.trim_matches('"'));
        }
    }
    None
}

/// Walk the multipart body delimiter by delimiter. Each part yields either
/// a form parameter or a file part depending on `filename=`.
fn parse_multipart(
    bytes: &[u8],
    range: Range<usize>,
    boundary: &str,
    params: &mut Vec<(String, String)>,
    files: &mut Vec<FilePart>,
) -> ParseResult<()> {
    let body = &bytes[range.clone()];
    let delim = format!("--{}", boundary).into_bytes();

    let mut pos = find_subsequence(body, &delim).ok_or(ParseError::BadMultipart)?;
    loop {
        let after = pos + delim.len();
        if body[after..].starts_with(b"--") {
            break; // Closing delimiter
        }
        if !body[after..].starts_with(b"\r\n") {
            return Err(ParseError::BadMultipart);
        }
        let part_start = after + 2;
        let next = find_subsequence(&body[part_start..], &delim)
            .map(|i| part_start + i)
            .ok_or(ParseError::BadMultipart)?;
        if next < part_start + 2 {
            return Err(ParseError::BadMultipart);
        }
        // Strip the \r\n that precedes the next delimiter.
        let part = &body[part_start..next - 2];
        parse_part(range.start + part_start, part, params, files)?;
        pos = next;
    }
    Ok(())
}

fn parse_part(
    part_offset: usize,
    part: &[u8],
    params: &mut Vec<(String, String)>,
    files: &mut Vec<FilePart>,
) -> ParseResult<()> {
    let head_len = find_subsequence(part, b"\r\n\r\n").ok_or(ParseError::BadMultipart)?;
    let content_off = head_len + 4;
    let content = &part[content_off..];

    let mut name = None;
    let mut filename = None;
    let mut content_type = None;
    for line in crlf_lines(&part[..head_len]) {
        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::BadMultipart)?;
        let value = std::str::from_utf8(&line[colon + 1..])
            .map_err(|_| ParseError::BadMultipart)?
            .trim();
        if line[..colon].eq_ignore_ascii_case(b"content-disposition") {
            name = disposition_param(value, "name").map(str::to_string);
            filename = disposition_param(value, "filename").map(str::to_string);
        } else if line[..colon].eq_ignore_ascii_case(b"content-type") {
            content_type = Some(value.to_string());
        }
    }

    let name = name.ok_or(ParseError::BadMultipart)?;
    match filename {
        Some(filename) => {
            let start = part_offset + content_off;
            files.push(FilePart {
                name,
                filename,
                content_type,
                data: start..start + content.len(),
            });
        }
        None => {
            let value =
                String::from_utf8(content.to_vec()).map_err(|_| ParseError::BadMultipart)?;
            params.push((name, value));
        }
    }
    Ok(())
}

/// `name="value"` parameter inside a Content-Disposition value.
fn disposition_param<'a>(disposition: &'a str, key: &str) -> Option<&'a str> {
    for param in disposition.split(';').map(str::trim) {
        if let Some(rest) = param.strip_prefix(key) {
            if let Some(value) = rest.strip_prefix('=') {
                return Some(value.trim_matches('"'));
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const LIMIT: usize = 5 * 1024 * 1024;

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    /// Feed the whole request in one shot and finalize.
    fn parse_one(raw: &[u8]) -> ParseResult<Request> {
        let mut parser = RequestParser::new();
        assert!(parser.is_complete(raw, LIMIT)?);
        parser.finalize(raw.to_vec().into_boxed_slice(), ip())
    }

    #[test]
    fn test_get_complete_at_header_end() {
        let raw = b"GET /ping HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut parser = RequestParser::new();
        assert!(!parser.is_complete(&raw[..10], LIMIT).unwrap());
        assert!(!parser.is_complete(&raw[..raw.len() - 1], LIMIT).unwrap());
        assert!(parser.is_complete(raw, LIMIT).unwrap());

        let req = parser.finalize(raw.to_vec().into_boxed_slice(), ip()).unwrap();
        assert_eq!(req.method(), Method::Get);
        assert_eq!(req.path(), "/ping");
        assert_eq!(req.header("host"), Some("a"));
        assert!(req.body().is_none());
    }

    #[test]
    fn test_post_waits_for_full_body() {
        let raw =
            b"POST /echo HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 14\r\n\r\n{\"id\":\"ANATR\"";
        let mut parser = RequestParser::new();
        // Headers done but body short by one byte
        assert!(!parser.is_complete(raw, LIMIT).unwrap());

        let mut full = raw.to_vec();
        full.push(b'}');
        assert!(parser.is_complete(&full, LIMIT).unwrap());

        let req = parser.finalize(full.into_boxed_slice(), ip()).unwrap();
        assert_eq!(req.param("id"), Some("ANATR"));
        assert_eq!(req.payload().unwrap()["id"], "ANATR");
        assert_eq!(req.body().unwrap(), b"{\"id\":\"ANATR\"}");
    }

    /// Fragmentation independence: any split of the byte stream reaches
    /// the same finalized request as a single read.
    #[test]
    fn test_fragmentation_independence() {
        let body = b"{\"id\":\"ANATR\"}  ";
        let mut raw = b"POST /orders?src=web HTTP/1.1\r\nHost: api\r\nContent-Type: application/json\r\nContent-Length: 16\r\n\r\n".to_vec();
        raw.extend_from_slice(body);

        let reference = parse_one(&raw).unwrap();

        for step in [1usize, 2, 3, 7, raw.len() / 2, raw.len() - 1] {
            let mut parser = RequestParser::new();
            let mut fed = 0;
            let mut complete = false;
            while fed < raw.len() {
                let next = (fed + step).min(raw.len());
                fed = next;
                complete = parser.is_complete(&raw[..fed], LIMIT).unwrap();
                if complete {
                    break;
                }
            }
            assert!(complete, "step {} never completed", step);
            assert_eq!(parser.request_len(), raw.len());
            let req = parser
                .finalize(raw[..fed].to_vec().into_boxed_slice(), ip())
                .unwrap();
            assert_eq!(req.path(), reference.path());
            assert_eq!(req.param("src"), Some("web"));
            assert_eq!(req.param("id"), Some("ANATR"));
            assert_eq!(req.body(), reference.body());
        }
    }

    #[test]
    fn test_unsupported_method_rejected_early() {
        let raw = b"DELETE /x HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::new();
        assert_eq!(
            parser.is_complete(raw, LIMIT),
            Err(ParseError::UnsupportedMethod)
        );
    }

    #[test]
    fn test_transfer_encoding_rejected() {
        let raw = b"GET / HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::TransferEncoding);
    }

    #[test]
    fn test_duplicate_host_rejected() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\nHost: b\r\n\r\n";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::DuplicateHost);
    }

    #[test]
    fn test_crlf_in_value_rejected() {
        // Lone LF smuggled inside a header value
        let raw = b"GET / HTTP/1.1\r\nX-A: a\nSet-Cookie: evil\r\n\r\n";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::HeaderInjection);
    }

    #[test]
    fn test_header_without_colon_rejected() {
        let raw = b"GET / HTTP/1.1\r\nNoColonHere\r\n\r\n";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::InvalidHeader);
    }

    #[test]
    fn test_invalid_header_name_byte_rejected() {
        let raw = b"GET / HTTP/1.1\r\nBad Name: v\r\n\r\n";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::InvalidHeader);
    }

    #[test]
    fn test_post_without_content_length_rejected() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Type: application/json\r\n\r\n";
        let mut parser = RequestParser::new();
        assert_eq!(
            parser.is_complete(raw, LIMIT),
            Err(ParseError::InvalidContentLength)
        );
    }

    #[test]
    fn test_oversized_content_length_is_terminal() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 99999999\r\n\r\n";
        let mut parser = RequestParser::new();
        assert_eq!(
            parser.is_complete(raw, 1024),
            Err(ParseError::BodyTooLarge {
                declared: 99999999,
                limit: 1024
            })
        );
    }

    #[test]
    fn test_unsupported_content_type_rejected() {
        let raw = b"POST /x HTTP/1.1\r\nContent-Type: text/xml\r\nContent-Length: 4\r\n\r\nabcd";
        assert_eq!(
            parse_one(raw).unwrap_err(),
            ParseError::UnsupportedContentType
        );
    }

    #[test]
    fn test_bad_json_rejected() {
        let raw =
            b"POST /x HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 4\r\n\r\n{{{{";
        assert_eq!(parse_one(raw).unwrap_err(), ParseError::BadJson);
    }

    #[test]
    fn test_query_only_params() {
        let raw = b"GET /find?user=ann&debug&id=7 HTTP/1.1\r\n\r\n";
        let req = parse_one(raw).unwrap();
        assert_eq!(req.param("user"), Some("ann"));
        assert_eq!(req.param("debug"), Some(""));
        assert_eq!(req.param("id"), Some("7"));
    }

    #[test]
    fn test_json_scalars_merge_into_params() {
        let body = br#"{"id":"ANATR","count":3,"dry":true,"nested":{"a":1}}"#;
        let raw = format!(
            "POST /x HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);

        let req = parse_one(&raw).unwrap();
        assert_eq!(req.param("id"), Some("ANATR"));
        assert_eq!(req.param("count"), Some("3"));
        assert_eq!(req.param("dry"), Some("true"));
        // Nested objects are only reachable through the payload
        assert_eq!(req.param("nested"), None);
        assert_eq!(req.payload().unwrap()["nested"]["a"], 1);
    }

    #[test]
    fn test_multipart_params_and_files() {
        let body = b"--XbOuNd\r\n\
            Content-Disposition: form-data; name=\"label\"\r\n\r\n\
            hello\r\n\
            --XbOuNd\r\n\
            Content-Disposition: form-data; name=\"doc\"; filename=\"a.txt\"\r\n\
            Content-Type: text/plain\r\n\r\n\
            file-bytes\r\n\
            --XbOuNd--\r\n";
        let raw = format!(
            "POST /upload HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=XbOuNd\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);

        let req = parse_one(&raw).unwrap();
        assert_eq!(req.param("label"), Some("hello"));
        assert_eq!(req.files().len(), 1);
        let part = &req.files()[0];
        assert_eq!(part.name, "doc");
        assert_eq!(part.filename, "a.txt");
        assert_eq!(part.content_type.as_deref(), Some("text/plain"));
        assert_eq!(req.file_data(part), b"file-bytes");
    }

    #[test]
    fn test_multipart_missing_terminator_rejected() {
        let body = b"--b\r\nContent-Disposition: form-data; name=\"x\"\r\n\r\nv\r\n";
        let raw = format!(
            "POST /u HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=b\r\nContent-Length: {}\r\n\r\n",
            body.len()
        );
        let mut raw = raw.into_bytes();
        raw.extend_from_slice(body);
        assert_eq!(parse_one(&raw).unwrap_err(), ParseError::BadMultipart);
    }

    #[test]
    fn test_request_len_marks_pipelined_tail() {
        let raw = b"GET /a HTTP/1.1\r\n\r\nGET /b HTTP/1.1\r\n\r\n";
        let mut parser = RequestParser::new();
        assert!(parser.is_complete(raw, LIMIT).unwrap());
        assert_eq!(parser.request_len(), b"GET /a HTTP/1.1\r\n\r\n".len());
    }

    #[test]
    fn test_terminator_across_read_boundary() {
        let raw = b"GET / HTTP/1.1\r\nHost: a\r\n\r\n";
        let mut parser = RequestParser::new();
        // Stop right in the middle of the terminator
        let cut = raw.len() - 2;
        assert!(!parser.is_complete(&raw[..cut], LIMIT).unwrap());
        assert!(parser.is_complete(raw, LIMIT).unwrap());
    }
}
