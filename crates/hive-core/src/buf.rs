//! Per-connection receive buffer
//!
//! Contiguous byte storage that grows forward in fixed-size chunks up to a
//! hard cap. The reactor reads into the writable tail and commits however
//! many bytes the kernel produced; the parser sees the committed prefix.
//! The buffer never shrinks during a connection's lifetime - a connection
//! that outgrows the cap is torn down, not truncated.

use core::fmt;

/// Growth granularity. Reads are issued against at least this much
/// writable tail.
pub const CHUNK_SIZE: usize = 4096;

/// Default hard cap for a single request (5 MiB).
pub const DEFAULT_MAX_SIZE: usize = 5 * 1024 * 1024;

/// Terminal error: the connection sent more bytes than the configured cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferFull {
    pub limit: usize,
}

impl fmt::Display for BufferFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "receive buffer limit of {} bytes exceeded", self.limit)
    }
}

impl std::error::Error for BufferFull {}

/// Growable receive buffer with a committed prefix and a writable tail.
pub struct RecvBuffer {
    data: Vec<u8>,
    /// Bytes received so far (committed prefix length).
    len: usize,
    /// Hard cap on `len`.
    max: usize,
}

impl RecvBuffer {
    /// Create a buffer with one chunk of initial capacity and the given cap.
    pub fn new(max: usize) -> Self {
        Self {
            data: vec![0u8; CHUNK_SIZE.min(max)],
            len: 0,
            max,
        }
    }

    /// Bytes committed so far.
    #[inline]
    pub fn filled(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn max_size(&self) -> usize {
        self.max
    }

    /// Writable tail span for the next read. Grows the buffer by whole
    /// chunks as needed; errors once growth would pass the cap and the
    /// committed bytes already fill current capacity.
    pub fn writable_tail(&mut self) -> Result<&mut [u8], BufferFull> {
        if self.len == self.data.len() {
            let grown = (self.data.len() + CHUNK_SIZE).min(self.max);
            if grown == self.data.len() {
                return Err(BufferFull { limit: self.max });
            }
            self.data.resize(grown, 0);
        }
        Ok(&mut self.data[self.len..])
    }

    /// Commit `n` bytes written into the tail by the last read.
    #[inline]
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.len + n <= self.data.len());
        self.len += n;
    }

    /// Consume the buffer, yielding exactly the committed bytes. The
    /// finalized request owns these for the lifetime of its views.
    pub fn into_bytes(mut self) -> Box<[u8]> {
        self.data.truncate(self.len);
        self.data.into_boxed_slice()
    }

    /// Reset for the next request on a kept-alive connection. Capacity is
    /// retained; only the committed length rewinds.
    pub fn reset(&mut self) {
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grows_in_chunks() {
        let mut buf = RecvBuffer::new(3 * CHUNK_SIZE);
        assert_eq!(buf.writable_tail().unwrap().len(), CHUNK_SIZE);

        buf.commit(CHUNK_SIZE);
        assert_eq!(buf.len(), CHUNK_SIZE);

        // Tail is exhausted, next call grows by one chunk
        let tail = buf.writable_tail().unwrap();
        assert_eq!(tail.len(), CHUNK_SIZE);
    }

    #[test]
    fn test_cap_is_terminal() {
        let mut buf = RecvBuffer::new(2 * CHUNK_SIZE);
        buf.writable_tail().unwrap();
        buf.commit(CHUNK_SIZE);
        buf.writable_tail().unwrap();
        buf.commit(CHUNK_SIZE);

        let err = buf.writable_tail().unwrap_err();
        assert_eq!(err, BufferFull { limit: 2 * CHUNK_SIZE });
    }

    #[test]
    fn test_cap_smaller_than_chunk() {
        let mut buf = RecvBuffer::new(16);
        assert_eq!(buf.writable_tail().unwrap().len(), 16);
        buf.commit(16);
        assert!(buf.writable_tail().is_err());
    }

    #[test]
    fn test_filled_view_and_into_bytes() {
        let mut buf = RecvBuffer::new(DEFAULT_MAX_SIZE);
        let tail = buf.writable_tail().unwrap();
        tail[..5].copy_from_slice(b"hello");
        buf.commit(5);

        assert_eq!(buf.filled(), b"hello");

        let bytes = buf.into_bytes();
        assert_eq!(&*bytes, b"hello");
    }

    #[test]
    fn test_reset_keeps_capacity() {
        let mut buf = RecvBuffer::new(DEFAULT_MAX_SIZE);
        buf.writable_tail().unwrap();
        buf.commit(100);
        buf.reset();
        assert!(buf.is_empty());
        assert_eq!(buf.writable_tail().unwrap().len(), CHUNK_SIZE);
    }
}
