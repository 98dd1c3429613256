//! Fixed-size buffer pools shared by the capture and transform stages

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use crossbeam::queue::ArrayQueue;

/// Lock-free pool of equally sized byte buffers.
///
/// Buffers are allocated once when the pool is created. A [`PooledBuffer`]
/// returns its storage on drop, so the steady state performs no heap
/// allocation. Once the pool itself is dropped, outstanding buffers are
/// simply freed.
pub struct BufferPool {
    free: ArrayQueue<Vec<u8>>,
    buffer_len: usize,
}

impl BufferPool {
    pub fn new(count: usize, buffer_len: usize) -> Arc<Self> {
        let free = ArrayQueue::new(count.max(1));
        for _ in 0..count.max(1) {
            let _ = free.push(vec![0u8; buffer_len]);
        }
        Arc::new(Self { free, buffer_len })
    }

    /// Take a free buffer, or `None` if every buffer is checked out.
    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledBuffer> {
        self.free.pop().map(|data| PooledBuffer {
            data,
            home: Arc::downgrade(self),
        })
    }

    /// Take a free buffer, allocating a fresh one on a pool miss.
    ///
    /// The second value is `true` when the buffer had to be allocated.
    pub fn acquire_or_alloc(self: &Arc<Self>) -> (PooledBuffer, bool) {
        match self.try_acquire() {
            Some(buffer) => (buffer, false),
            None => (
                PooledBuffer {
                    data: vec![0u8; self.buffer_len],
                    home: Arc::downgrade(self),
                },
                true,
            ),
        }
    }

    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.free.capacity()
    }
}

/// Byte buffer checked out of a [`BufferPool`].
pub struct PooledBuffer {
    data: Vec<u8>,
    home: Weak<BufferPool>,
}

impl PooledBuffer {
    /// A buffer that belongs to no pool.
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            data,
            home: Weak::new(),
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        if let Some(pool) = self.home.upgrade() {
            if data.len() == pool.buffer_len {
                // Full only if extra buffers were allocated on a miss.
                let _ = pool.free.push(data);
            }
        }
    }
}
