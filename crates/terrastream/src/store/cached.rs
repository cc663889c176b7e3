//! Cache storage entries.

use std::sync::Arc;

use crate::region::Region;

/// A region held in cache storage.
///
/// `times_cached` counts marks: one per pending pipeline step, one per
/// caching context, one for a save the entry is waiting on, and one for
/// the "please add to primary" request. Only mutated under the
/// coordinate's stripe lock.
#[derive(Debug)]
pub(crate) struct CachedRegion {
    pub(crate) region: Arc<Region>,
    pub(crate) times_cached: u32,
    /// Once prepared, move to primary storage instead of discarding.
    pub(crate) prepare_for_primary: bool,
    /// One of the marks belongs to an in-flight save.
    pub(crate) save_mark: bool,
}

impl CachedRegion {
    pub(crate) const fn new(region: Arc<Region>, times_cached: u32, for_primary: bool) -> Self {
        Self {
            region,
            times_cached,
            prepare_for_primary: for_primary,
            save_mark: false,
        }
    }

    #[inline]
    pub(crate) fn mark(&mut self) {
        self.times_cached += 1;
    }

    /// Drops one mark. Returns false (and leaves the count at zero) on underflow.
    #[inline]
    pub(crate) fn unmark(&mut self) -> bool {
        match self.times_cached.checked_sub(1) {
            Some(n) => {
                self.times_cached = n;
                true
            }
            None => false,
        }
    }
}
