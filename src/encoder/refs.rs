//! Reference frame table management.
//!
//! A fixed, ordered set of surface references used for temporal prediction.
//! The table is pure mechanism: which slots a picture rebinds or refreshes
//! is decided by the codec pipeline that owns it. All mutation happens
//! strictly after a successful submission, so a failed encode can never
//! leave a half-updated table.

use tracing::debug;

use crate::backend::{SurfaceId, INVALID_SURFACE_ID};
use crate::surface::SurfaceProxy;

/// Fixed-size table of reference surface slots.
#[derive(Debug, Default)]
pub struct ReferenceFrameTable {
    slots: Vec<Option<SurfaceProxy>>,
}

impl ReferenceFrameTable {
    /// Creates a table with `slot_count` empty slots.
    pub fn new(slot_count: usize) -> Self {
        Self {
            slots: (0..slot_count).map(|_| None).collect(),
        }
    }

    /// Number of slots in the table.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The surface held by `index`, if any.
    pub fn slot(&self, index: usize) -> Option<&SurfaceProxy> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// Returns true once every slot holds a reference.
    pub fn is_populated(&self) -> bool {
        self.slots.iter().all(|slot| slot.is_some())
    }

    /// Per-slot surface ids, substituting the "no reference" sentinel for
    /// empty slots.
    pub fn slot_ids(&self) -> Vec<SurfaceId> {
        self.slots
            .iter()
            .map(|slot| slot.as_ref().map_or(INVALID_SURFACE_ID, SurfaceProxy::id))
            .collect()
    }

    /// Rebinds every slot to `surface`, releasing all previous references.
    ///
    /// Used after an intra picture: the new reconstruction becomes the only
    /// prediction source.
    pub fn rebind_all(&mut self, surface: SurfaceProxy) {
        for slot in &mut self.slots {
            *slot = Some(surface.clone());
        }
        debug!(
            "Reference table rebound: surface {} in all {} slots",
            surface.id(),
            self.slots.len()
        );
    }

    /// Replaces the slots selected by `mask` (bit N selects slot N) with
    /// `surface`, releasing the previous references of those slots only.
    pub fn refresh(&mut self, mask: u32, surface: SurfaceProxy) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if mask & (1 << index) != 0 {
                *slot = Some(surface.clone());
            }
        }
        debug!(
            "Reference table refreshed: surface {} via mask {mask:#04x}",
            surface.id()
        );
    }

    /// Empties every slot, releasing all held references.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}
