//! # Collaborator Interfaces
//!
//! The store never touches durable storage or world generation itself.
//! It hands regions to a [`RegionLoader`] and a [`RegionGenerator`] and
//! is called back through a [`Completion`] once the work is done.
//!
//! ```text
//!   RegionStore ──load──> RegionLoader ──Completion──┐
//!        ▲     ──generate──> RegionGenerator ──────┤
//!        │     ──save──> RegionLoader ─────────────┤
//!        └──────────── advance(step, success) <────┘
//! ```
//!
//! Implementations are expected to do the work asynchronously (a worker
//! pool); completing inline on the calling thread is also supported.

use std::sync::Arc;

use crate::region::Region;

pub use crate::store::Completion;

/// Durable storage for regions.
pub trait RegionLoader: Send + Sync {
    /// Populates `region` from storage.
    ///
    /// If stored data is found and it is generated, the loader calls
    /// `region.lifecycle().mark_generated(region.has_pending_structures())`
    /// before completing. A region absent from storage is a successful,
    /// ungenerated load.
    ///
    /// `for_simulation` hints that the region is headed for primary storage.
    fn load(&self, region: Arc<Region>, for_simulation: bool, done: Completion);

    /// Persists `region`. `is_final` is set when the region is leaving memory.
    fn save(&self, region: Arc<Region>, is_final: bool, done: Completion);
}

/// World generation.
pub trait RegionGenerator: Send + Sync {
    /// Fills an ungenerated region and implants its queued structures.
    fn generate(&self, region: Arc<Region>, done: Completion);
}

/// Callbacks into the host world. Always invoked on the simulation thread,
/// never while a store lock is held.
pub trait WorldHooks: Send + Sync {
    /// A region entered primary storage and should be merged into the live
    /// simulation (entities, scheduled actions).
    fn on_import(&self, _region: &Region) {}

    /// A region is about to leave primary storage.
    fn on_evict(&self, _region: &Region) {}

    /// Per-tick simulation of an active region.
    fn tick_region(&self, _region: &Region, _age: u64) {}
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl WorldHooks for NoHooks {}
