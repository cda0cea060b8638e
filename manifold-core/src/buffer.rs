//! Reassembly buffer for chunked stream input.
//!
//! Stream transports deliver reads as arbitrarily-sized chunks; the frame
//! decoder needs exact byte counts. `ChunkBuffer` queues the chunks and hands
//! out prefixes, taking a zero-copy slice whenever a request falls inside a
//! single chunk and copying only when it spans several.

use bytes::{Buf, Bytes, BytesMut};
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct ChunkBuffer {
    chunks: VecDeque<Bytes>,
    len: usize,
}

impl ChunkBuffer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunks: VecDeque::new(),
            len: 0,
        }
    }

    /// Total buffered bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Queue a chunk. Empty chunks are ignored.
    pub fn push(&mut self, chunk: Bytes) {
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push_back(chunk);
    }

    /// Copy the first `dst.len()` buffered bytes into `dst` without consuming
    /// them. Returns `false` if not enough bytes are buffered.
    pub fn peek(&self, dst: &mut [u8]) -> bool {
        if dst.len() > self.len {
            return false;
        }
        let mut off = 0;
        for chunk in &self.chunks {
            if off == dst.len() {
                break;
            }
            let take = (dst.len() - off).min(chunk.len());
            dst[off..off + take].copy_from_slice(&chunk[..take]);
            off += take;
        }
        true
    }

    /// Drop the first `n` buffered bytes.
    ///
    /// # Panics
    ///
    /// Panics if `n` exceeds the buffered length.
    pub fn discard(&mut self, mut n: usize) {
        assert!(n <= self.len, "discard past end of buffer");
        self.len -= n;
        while n > 0 {
            let Some(mut front) = self.chunks.pop_front() else {
                break;
            };
            if n >= front.len() {
                n -= front.len();
                continue;
            }
            front.advance(n);
            self.chunks.push_front(front);
            break;
        }
    }

    /// Take exactly `n` bytes from the front, or `None` if fewer are buffered.
    ///
    /// Zero-copy when the front chunk covers the request.
    pub fn take(&mut self, n: usize) -> Option<Bytes> {
        if n == 0 {
            return Some(Bytes::new());
        }
        if n > self.len {
            return None;
        }

        let front = self.chunks.front_mut()?;
        if front.len() >= n {
            self.len -= n;
            let out = front.split_to(n);
            if front.is_empty() {
                self.chunks.pop_front();
            }
            return Some(out);
        }

        // Spans chunks: assemble a contiguous copy.
        let mut out = BytesMut::with_capacity(n);
        let mut remaining = n;
        while remaining > 0 {
            let Some(mut chunk) = self.chunks.pop_front() else {
                break;
            };
            let take = remaining.min(chunk.len());
            out.extend_from_slice(&chunk[..take]);
            remaining -= take;
            self.len -= take;
            if take < chunk.len() {
                chunk.advance(take);
                self.chunks.push_front(chunk);
            }
        }
        Some(out.freeze())
    }
}
