use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::services::sniff::SNIFF_LEN;

/// Reusable sniff buffers shared by the ingest workers.
#[derive(Clone)]
pub struct BufferPool {
    pool: Arc<ArrayQueue<BytesMut>>,
    buffer_size: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Self {
        let pool = ArrayQueue::new(capacity.max(1));
        for _ in 0..capacity {
            let _ = pool.push(BytesMut::with_capacity(buffer_size));
        }
        Self {
            pool: Arc::new(pool),
            buffer_size,
        }
    }

    /// One sniff-sized buffer per worker.
    pub fn for_workers(workers: usize) -> Self {
        Self::new(workers, SNIFF_LEN)
    }

    /// Take a buffer; a fresh one is allocated when the pool is empty.
    /// The buffer goes back to the pool when the guard drops.
    pub fn checkout(&self) -> PooledBuffer {
        let buf = self
            .pool
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_size));
        PooledBuffer {
            buf,
            pool: self.pool.clone(),
        }
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.pool.len()
    }
}

pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<ArrayQueue<BytesMut>>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        // A full pool just lets the extra buffer go.
        let _ = self.pool.push(buf);
    }
}
