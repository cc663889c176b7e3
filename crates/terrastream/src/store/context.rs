//! Per-worker record of cached regions.

use std::collections::HashMap;
use std::sync::Arc;

use crate::coord::RegionCoord;
use crate::region::Region;

/// The regions one worker has borrowed through
/// [`RegionStore::cache`](crate::RegionStore::cache).
///
/// Each worker owns one context and passes it to every `cache` and
/// `uncache_all` call. Caching the same coordinate twice through one
/// context returns the same region and takes a single store mark.
///
/// ```rust,ignore
/// let mut ctx = CacheContext::new();
/// let west = store.cache(&mut ctx, coord.offset(-1, 0));
/// let east = store.cache(&mut ctx, coord.offset(1, 0));
/// // ... read both ...
/// store.uncache_all(&mut ctx);
/// ```
#[derive(Debug, Default)]
pub struct CacheContext {
    pub(crate) held: HashMap<RegionCoord, Arc<Region>>,
}

impl CacheContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of regions currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.held.len()
    }

    /// Returns true if nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }

    /// Returns a region this context already holds.
    #[must_use]
    pub fn get(&self, coord: RegionCoord) -> Option<&Arc<Region>> {
        self.held.get(&coord)
    }

    /// Coordinates currently held.
    pub fn coords(&self) -> impl Iterator<Item = RegionCoord> + '_ {
        self.held.keys().copied()
    }
}

impl Drop for CacheContext {
    fn drop(&mut self) {
        if !self.held.is_empty() {
            tracing::warn!(
                "cache context dropped while holding {} regions; their marks are leaked",
                self.held.len()
            );
        }
    }
}
