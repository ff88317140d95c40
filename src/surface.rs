//! Surface pool and reference-counted surface proxies.
//!
//! Surfaces are backend-owned picture buffers. The pool preallocates a
//! bounded set and hands out [`SurfaceProxy`] handles; a surface returns to
//! the free list when the last proxy clone referencing it drops. The
//! reference table, the pipeline, and in-flight submissions all hold proxy
//! clones rather than raw ids, so reuse before eviction is impossible.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::backend::{Backend, SurfaceId};
use crate::error::{Result, VaForgeError};

/// Bounded pool of hardware picture surfaces.
pub struct SurfacePool {
    shared: Arc<PoolShared>,
}

struct PoolShared {
    backend: Arc<dyn Backend>,
    state: Mutex<PoolState>,
}

struct PoolState {
    free: VecDeque<SurfaceId>,
    all: Vec<SurfaceId>,
}

impl SurfacePool {
    /// Creates a pool of `capacity` surfaces with the given dimensions.
    pub fn new(
        backend: Arc<dyn Backend>,
        width: u32,
        height: u32,
        capacity: usize,
    ) -> Result<Self> {
        if capacity == 0 {
            return Err(VaForgeError::InvalidInput(
                "surface pool capacity must be nonzero".into(),
            ));
        }

        let mut all = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            match backend.create_surface(width, height) {
                Ok(id) => all.push(id),
                Err(err) => {
                    // Roll back the partial allocation.
                    for &id in &all {
                        backend.destroy_surface(id);
                    }
                    return Err(err);
                }
            }
        }
        let free = all.iter().copied().collect();
        debug!("Surface pool created: {capacity} surfaces {width}x{height}");

        Ok(Self {
            shared: Arc::new(PoolShared {
                backend,
                state: Mutex::new(PoolState { free, all }),
            }),
        })
    }

    /// Acquires a free surface as a fresh encode target.
    ///
    /// Fails with [`VaForgeError::AllocationFailed`] when every surface is
    /// held by an outstanding proxy.
    pub fn acquire(&self) -> Result<SurfaceProxy> {
        let mut state = self.shared.lock();
        match state.free.pop_front() {
            Some(id) => {
                debug!("Surface {id} acquired ({} free)", state.free.len());
                Ok(SurfaceProxy {
                    inner: Arc::new(ProxyInner {
                        id,
                        pool: Arc::clone(&self.shared),
                    }),
                })
            }
            None => Err(VaForgeError::AllocationFailed(format!(
                "surface pool exhausted ({} surfaces in use)",
                state.all.len()
            ))),
        }
    }

    /// Surfaces currently available for acquisition.
    pub fn free_count(&self) -> usize {
        self.shared.lock().free.len()
    }

    /// Total surfaces owned by the pool.
    pub fn capacity(&self) -> usize {
        self.shared.lock().all.len()
    }
}

impl Drop for SurfacePool {
    fn drop(&mut self) {
        let state = self.shared.lock();
        let outstanding = state.all.len() - state.free.len();
        if outstanding > 0 {
            warn!("Surface pool dropped with {outstanding} surfaces still in use");
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
            self.backend.destroy_surface(id);
        }
        debug!("Surface pool destroyed ({} surfaces)", state.all.len());
    }
}

/// Reference-counted handle to a pooled surface.
///
/// Clones share a single reference count. The surface id returns to the
/// pool's free list when the last clone drops.
#[derive(Clone)]
pub struct SurfaceProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    id: SurfaceId,
    pool: Arc<PoolShared>,
}

impl SurfaceProxy {
    /// Backend id of the underlying surface.
    pub fn id(&self) -> SurfaceId {
        self.inner.id
    }

    /// Live handles to this surface, including this one.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl std::fmt::Debug for SurfaceProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurfaceProxy")
            .field("id", &self.inner.id)
            .field("ref_count", &self.ref_count())
            .finish()
    }
}

impl Drop for ProxyInner {
    fn drop(&mut self) {
        let mut state = self.pool.lock();
        state.free.push_back(self.id);
        debug!("Surface {} returned to pool ({} free)", self.id, state.free.len());
    }
}
