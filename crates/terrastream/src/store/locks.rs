//! Per-coordinate striped locks.
//!
//! Every check-decrement-and-branch on a coordinate's cache entry, and
//! every move between cache and primary storage, happens under the stripe
//! for that coordinate. Stripes guard bookkeeping only, never the payload.
//! A thread holds at most one stripe at a time.

use parking_lot::{Mutex, MutexGuard};

use crate::coord::RegionCoord;

/// Fixed array of mutexes indexed by coordinate hash.
pub(crate) struct StripedLocks {
    stripes: Box<[Mutex<()>]>,
}

impl StripedLocks {
    pub(crate) fn new(count: usize) -> Self {
        Self {
            stripes: (0..count.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    #[inline]
    fn stripe_of(&self, coord: RegionCoord) -> usize {
        (coord.stripe_hash() % self.stripes.len() as u64) as usize
    }

    /// Locks the stripe owning `coord`.
    #[inline]
    pub(crate) fn lock(&self, coord: RegionCoord) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(coord)].lock()
    }
}
