//! Coded buffer pool.
//!
//! Coded buffers are backend-owned output containers for compressed
//! bitstream bytes. One is bound per submitted picture; the pipeline maps
//! the bytes out after a successful submission and the buffer returns to
//! the free list when its [`CodedBufferProxy`] drops.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::{Backend, BufferId};
use crate::error::{Result, VaForgeError};

/// Bounded pool of equally sized coded buffers.
pub struct CodedBufferPool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    backend: Arc<dyn Backend>,
    buffer_size: usize,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: VecDeque<BufferId>,
    all: Vec<BufferId>,
}

impl CodedBufferPool {
    /// Creates a pool of `capacity` coded buffers of `buffer_size` bytes.
    pub fn new(backend: Arc<dyn Backend>, buffer_size: usize, capacity: usize) -> Result<Self> {
        if capacity == 0 || buffer_size == 0 {
            return Err(VaForgeError::InvalidInput(
                "coded buffer pool needs nonzero size and capacity".into(),
            ));
        }

        let mut all = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match backend.create_coded_buffer(buffer_size) {
                Ok(id) => all.push(id),
                Err(err) => {
                    // Roll back the partial allocation.
                    for &id in &all {
                        backend.destroy_coded_buffer(id);
                    }
                    return Err(err);
                }
            }
        }
        let free = all.iter().copied().collect();
        debug!("Coded buffer pool created: {capacity} buffers of {buffer_size} bytes");

        Ok(Self {
            shared: Arc::new(PoolShared {
                backend,
                buffer_size,
                state: Mutex::new(PoolState { free, all }),
            }),
        })
    }

    /// Acquires a free coded buffer for the next submission.
    ///
    /// Fails with [`VaForgeError::AllocationFailed`] when all buffers are
    /// bound to pictures that have not been consumed yet.
    pub fn acquire(&self) -> Result<CodedBufferProxy> {
        let mut state = self.shared.lock();
        match state.free.pop_front() {
            Some(id) => {
                debug!("Coded buffer {id} acquired ({} free)", state.free.len());
                Ok(CodedBufferProxy {
                    id,
                    pool: Arc::clone(&self.shared),
                })
            }
            None => Err(VaForgeError::AllocationFailed(format!(
                "coded buffer pool exhausted ({} buffers in use)",
                state.all.len()
            ))),
        }
    }

    /// Byte size of each buffer in the pool.
    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size
    }

    /// Buffers currently available for acquisition.
    pub fn free_count(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Total buffers owned by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.lock().all.len()
    }
}

impl Drop for CodedBufferPool {
    fn drop(&mut self) {
        let state = self.shared.lock();
        let outstanding = state.all.len() - state.free.len();
        if outstanding > 0 {
            warn!("Coded buffer pool dropped with {outstanding} buffers still in use");
        }
    }
}

impl PoolShared {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for PoolShared {
    fn drop(&mut self) {
        let state = self.lock();
        for &id in &state.all {
            self.backend.destroy_coded_buffer(id);
        }
        debug!("Coded buffer pool destroyed ({} buffers)", state.all.len());
    }
}

/// Exclusive handle to a pooled coded buffer.
///
/// The buffer id returns to the pool when the proxy drops.
pub struct CodedBufferProxy {
    id: BufferId,
    pool: Arc<PoolShared>,
}

impl CodedBufferProxy {
    /// Backend id of the underlying buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Reads the compressed bytes written by a successful submission.
    pub fn map(&self) -> Result<Vec<u8>> {
        self.pool.backend.map_coded_buffer(self.id)
    }
}

impl std::fmt::Debug for CodedBufferProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodedBufferProxy")
            .field("id", &self.id)
            .finish()
    }
}

impl Drop for CodedBufferProxy {
    fn drop(&mut self) {
        let mut state = self.pool.lock();
        state.free.push_back(self.id);
        debug!(
            "Coded buffer {} returned to pool ({} free)",
            self.id,
            state.free.len()
        );
    }
}
