//! Connection state and the fd-keyed connection table
//!
//! A `Connection` is owned exclusively by one reactor and never crosses a
//! thread boundary; only the finalized `Request` (behind an `Arc`) is
//! shared with a worker. The single-in-flight invariant lives in the
//! state machine: a `Dispatched` connection is never read from until its
//! response comes back.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use hive_core::buf::{BufferFull, RecvBuffer};
use hive_http::error::ParseError;
use hive_http::{Request, RequestParser};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Accumulating request bytes.
    Reading,
    /// Request handed to a worker; no reads until the response returns.
    Dispatched,
    /// Response bytes draining to the socket.
    Writing,
}

/// Monotonic token distinguishing table entries that reuse an fd. A
/// response carrying a stale generation is dropped instead of being
/// written to whichever connection now owns the fd.
pub type Generation = u64;

pub struct Connection {
    fd: i32,
    generation: Generation,
    remote_ip: IpAddr,
    state: ConnState,
    buf: RecvBuffer,
    parser: RequestParser,
    max_request_bytes: usize,
    /// Bytes past the current request (pipelined next request), replayed
    /// into the buffer on reset.
    carry: Vec<u8>,
    send_buf: Vec<u8>,
    send_off: usize,
    close_after_write: bool,
    last_activity: Instant,
}

impl Connection {
    pub fn new(fd: i32, generation: Generation, remote_ip: IpAddr, max_request_bytes: usize) -> Self {
        Self {
            fd,
            generation,
            remote_ip,
            state: ConnState::Reading,
            buf: RecvBuffer::new(max_request_bytes),
            parser: RequestParser::new(),
            max_request_bytes,
            carry: Vec::new(),
            send_buf: Vec::new(),
            send_off: 0,
            close_after_write: false,
            last_activity: Instant::now(),
        }
    }

    #[inline]
    pub fn fd(&self) -> i32 {
        self.fd
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    #[inline]
    pub fn remote_ip(&self) -> IpAddr {
        self.remote_ip
    }

    #[inline]
    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn set_state(&mut self, state: ConnState) {
        self.state = state;
    }

    /// Record activity for the idle sweep.
    #[inline]
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.duration_since(self.last_activity)
    }

    // ── Read side ──

    pub fn writable_tail(&mut self) -> Result<&mut [u8], BufferFull> {
        self.buf.writable_tail()
    }

    pub fn commit(&mut self, n: usize) {
        self.buf.commit(n);
    }

    /// Incremental completeness check against everything buffered so far.
    pub fn check_complete(&mut self) -> Result<bool, ParseError> {
        self.parser
            .is_complete(self.buf.filled(), self.buf.max_size())
    }

    /// Finalize the buffered request. Bytes past the request boundary are
    /// retained and replayed after the response drains. Only call after
    /// `check_complete` returned true.
    pub fn take_request(&mut self) -> Result<Request, ParseError> {
        let parser = std::mem::take(&mut self.parser);
        let total = parser.request_len();

        let buf = std::mem::replace(&mut self.buf, RecvBuffer::new(self.max_request_bytes));
        let mut bytes = buf.into_bytes().into_vec();
        if bytes.len() > total {
            self.carry = bytes.split_off(total);
        }
        parser.finalize(bytes.into_boxed_slice(), self.remote_ip)
    }

    // ── Write side ──

    /// Stage a serialized response for write-out.
    pub fn begin_write(&mut self, bytes: Vec<u8>, close_after: bool) {
        self.send_buf = bytes;
        self.send_off = 0;
        self.close_after_write = close_after;
        self.state = ConnState::Writing;
    }

    #[inline]
    pub fn pending_write(&self) -> &[u8] {
        &self.send_buf[self.send_off..]
    }

    pub fn advance_write(&mut self, n: usize) {
        self.send_off += n;
        debug_assert!(self.send_off <= self.send_buf.len());
    }

    #[inline]
    pub fn write_done(&self) -> bool {
        self.send_off >= self.send_buf.len()
    }

    #[inline]
    pub fn close_after_write(&self) -> bool {
        self.close_after_write
    }

    /// Keep-alive reset: rewind buffer and parser for the next request,
    /// replaying any pipelined bytes captured at finalize time.
    pub fn reset_for_next_request(&mut self) {
        self.buf.reset();
        self.parser = RequestParser::new();
        self.send_buf.clear();
        self.send_off = 0;
        self.close_after_write = false;
        self.state = ConnState::Reading;
        self.touch();

        if !self.carry.is_empty() {
            let carry = std::mem::take(&mut self.carry);
            let mut written = 0;
            while written < carry.len() {
                // Cannot overflow: the carry came out of this same buffer
                let tail = match self.buf.writable_tail() {
                    Ok(t) => t,
                    Err(_) => break,
                };
                let n = tail.len().min(carry.len() - written);
                tail[..n].copy_from_slice(&carry[written..written + n]);
                self.buf.commit(n);
                written += n;
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        unsafe { libc::close(self.fd) };
    }
}

/// Owning fd → connection map; one per reactor.
#[derive(Default)]
pub struct ConnTable {
    map: HashMap<i32, Connection>,
}

impl ConnTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, conn: Connection) {
        self.map.insert(conn.fd(), conn);
    }

    pub fn get_mut(&mut self, fd: i32) -> Option<&mut Connection> {
        self.map.get_mut(&fd)
    }

    /// Remove (and thereby close) a connection.
    pub fn remove(&mut self, fd: i32) -> Option<Connection> {
        self.map.remove(&fd)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Fds idle past `timeout`, excluding dispatched connections (a slow
    /// handler is not the peer's fault).
    pub fn idle_fds(&self, timeout: Duration, now: Instant) -> Vec<i32> {
        self.map
            .values()
            .filter(|c| c.state() != ConnState::Dispatched && c.idle_for(now) > timeout)
            .map(|c| c.fd())
            .collect()
    }
}
