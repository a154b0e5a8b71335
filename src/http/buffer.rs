//! Reusable byte buffers
//!
//! A small free list of `BytesMut` so hot paths (HTTP/1.1 reads, HTTP/2
//! header-block reassembly) do not allocate per message. The pool holds at
//! most `max_buffers` buffers and drops any buffer that grew beyond
//! `max_capacity`, so a single large message cannot pin memory forever.

use bytes::BytesMut;
use std::sync::{Mutex, PoisonError};

/// Initial capacity of freshly allocated buffers
const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<BytesMut>>,
    max_buffers: usize,
    max_capacity: usize,
}

impl BufferPool {
    pub fn new(max_buffers: usize, max_capacity: usize) -> Self {
        BufferPool {
            free: Mutex::new(Vec::with_capacity(max_buffers)),
            max_buffers,
            max_capacity,
        }
    }

    /// Take an empty buffer, reusing a released one when available
    pub fn get(&self) -> BytesMut {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(DEFAULT_BUFFER_CAPACITY.min(self.max_capacity)))
    }

    /// Return a buffer; it is cleared, and dropped if the pool is full or
    /// the buffer grew too large
    pub fn put(&self, mut buf: BytesMut) {
        if buf.capacity() > self.max_capacity {
            return;
        }
        buf.clear();
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_buffers {
            free.push(buf);
        }
    }

    /// Number of buffers currently held for reuse
    pub fn available(&self) -> usize {
        self.free.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        BufferPool::new(16, 64 * 1024)
    }
}
