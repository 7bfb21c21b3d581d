// Response Buffer Pool
//
// Reusable byte buffers for streaming response documents. A request takes one
// buffer when it starts writing and hands it back once the document is done.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;

use crate::common::types::{DEFAULT_BUFFER_CAPACITY, DEFAULT_POOL_SIZE};

static SHARED_POOL: Lazy<Arc<BufferPool>> =
    Lazy::new(|| Arc::new(BufferPool::new(DEFAULT_BUFFER_CAPACITY, DEFAULT_POOL_SIZE)));

/// Pool of response buffers with a fixed flush capacity
pub struct BufferPool {
    /// Queue of idle buffers
    pool: ArrayQueue<Vec<u8>>,
    /// Number of buffered bytes beyond which a writer flushes
    capacity: usize,
    /// Total buffers allocated (for statistics)
    buffers_created: AtomicUsize,
}

impl BufferPool {
    /// Create a pool whose buffers flush beyond `capacity` bytes,
    /// keeping at most `pool_size` idle buffers around.
    pub fn new(capacity: usize, pool_size: usize) -> Self {
        Self {
            pool: ArrayQueue::new(pool_size.max(1)),
            capacity: capacity.max(1),
            buffers_created: AtomicUsize::new(0),
        }
    }

    /// Process-wide pool with default sizing
    pub fn shared() -> Arc<BufferPool> {
        Arc::clone(&SHARED_POOL)
    }

    /// Take a cleared buffer from the pool, allocating if none is idle
    pub fn get_buffer(&self) -> Vec<u8> {
        match self.pool.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => {
                self.buffers_created.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(self.capacity)
            }
        }
    }

    /// Return a buffer. Oversized buffers are dropped instead of kept.
    pub fn put_buffer(&self, mut buf: Vec<u8>) {
        if buf.capacity() > self.capacity * 4 {
            return;
        }
        buf.clear();
        let _ = self.pool.push(buf);
    }

    /// Flush threshold for buffers from this pool
    pub fn buffer_capacity(&self) -> usize {
        self.capacity
    }

    /// Number of idle buffers
    pub fn available(&self) -> usize {
        self.pool.len()
    }

    pub fn buffers_created(&self) -> usize {
        self.buffers_created.load(Ordering::Relaxed)
    }
}
