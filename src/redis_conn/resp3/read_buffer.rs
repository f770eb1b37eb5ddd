//! Read buffer (C1, §4.1). A contiguous, growable byte buffer with
//! append-at-tail / consume-at-head semantics and a hard size cap.

use crate::redis_conn::error::{Error, ProtocolError, Result};

pub struct ReadBuffer {
    buf: Vec<u8>,
    /// Length of the committed prefix; always `<= buf.len()`.
    committed: usize,
    max_size: usize,
}

impl ReadBuffer {
    pub fn new(max_size: usize) -> Self {
        ReadBuffer { buf: Vec::new(), committed: 0, max_size }
    }

    pub fn with_capacity(initial_capacity: usize, max_size: usize) -> Self {
        ReadBuffer { buf: Vec::with_capacity(initial_capacity.min(max_size)), committed: 0, max_size }
    }

    /// Returns a writable span of at least `hint` bytes past the committed
    /// prefix. Never grows the buffer past `max_size`; fails and leaves the
    /// buffer unchanged if it would have to.
    pub fn prepare_append(&mut self, hint: usize) -> Result<&mut [u8]> {
        let needed = self.committed.checked_add(hint).ok_or(Error::protocol(ProtocolError::BufferCapExceeded))?;
        if needed > self.max_size {
            return Err(Error::protocol(ProtocolError::BufferCapExceeded));
        }
        if self.buf.len() < needed {
            self.buf.resize(needed, 0);
        }
        Ok(&mut self.buf[self.committed..needed])
    }

    /// Commits `n` bytes of the span previously returned by `prepare_append`.
    pub fn commit_append(&mut self, n: usize) {
        let new_committed = self.committed + n;
        debug_assert!(new_committed <= self.buf.len());
        self.committed = new_committed.min(self.buf.len());
    }

    /// The committed prefix, i.e. the bytes available to the parser.
    pub fn committed_view(&self) -> &[u8] {
        &self.buf[..self.committed]
    }

    pub fn len(&self) -> usize {
        self.committed
    }

    pub fn is_empty(&self) -> bool {
        self.committed == 0
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Shifts the bytes after `n` down to the origin, shrinking the
    /// committed view by `n`. Returns the number of bytes shifted, for usage
    /// accounting (§1.2's `bytes_rotated`).
    pub fn consume(&mut self, n: usize) -> usize {
        assert!(n <= self.committed, "consume({}) exceeds committed length {}", n, self.committed);
        let remaining = self.committed - n;
        if remaining > 0 {
            self.buf.copy_within(n..self.committed, 0);
        }
        self.committed = remaining;
        remaining
    }

    pub fn clear(&mut self) {
        self.committed = 0;
    }

    /// Ensures at least `additional` bytes of spare capacity beyond the
    /// committed prefix, without committing anything.
    pub fn reserve(&mut self, additional: usize) {
        let target = (self.committed + additional).min(self.max_size);
        if self.buf.len() < target {
            self.buf.resize(target, 0);
        }
    }
}

impl PartialEq for ReadBuffer {
    // Equality compares committed contents only, not capacity (§4.1).
    fn eq(&self, other: &Self) -> bool {
        self.committed_view() == other.committed_view()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_commit_consume_roundtrip() {
        let mut rb = ReadBuffer::new(1024);
        let span = rb.prepare_append(5).unwrap();
        span.copy_from_slice(b"hello");
        rb.commit_append(5);
        assert_eq!(rb.committed_view(), b"hello");

        let span = rb.prepare_append(1).unwrap();
        span[0] = b'!';
        rb.commit_append(1);
        assert_eq!(rb.committed_view(), b"hello!");

        rb.consume(3);
        assert_eq!(rb.committed_view(), b"lo!");
    }

    #[test]
    fn prepare_append_fails_past_max_size_and_leaves_buffer_unchanged() {
        let mut rb = ReadBuffer::new(4);
        let span = rb.prepare_append(4).unwrap();
        span.copy_from_slice(b"abcd");
        rb.commit_append(4);
        assert!(rb.prepare_append(1).is_err());
        assert_eq!(rb.committed_view(), b"abcd");
    }

    #[test]
    fn equality_ignores_capacity() {
        let mut a = ReadBuffer::with_capacity(4, 1024);
        let mut b = ReadBuffer::with_capacity(256, 1024);
        for rb in [&mut a, &mut b] {
            let span = rb.prepare_append(2).unwrap();
            span.copy_from_slice(b"hi");
            rb.commit_append(2);
        }
        assert_eq!(a, b);
    }
}
