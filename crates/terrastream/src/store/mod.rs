//! # Region Store
//!
//! Owns every resident region and decides when each one is loaded,
//! generated, saved, promoted and evicted.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        REGION STORE                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  primary: DashMap<RegionCoord, Arc<Region>>   (simulated)    │
//! │  cache:   DashMap<RegionCoord, CachedRegion>  (ref-counted)  │
//! │  locks:   [Mutex<()>; N] striped by coordinate               │
//! ├──────────────────────────────────────────────────────────────┤
//! │  simulation thread ── anchor / deanchor / update / save_all  │
//! │  any thread ───────── cache / uncache_all / queue_structure  │
//! │  worker threads ───── Completion -> advance()                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//!
//! - A region reaches primary storage only once `Prepared`.
//! - A coordinate maps to one `Region` instance across both maps.
//! - A cache entry is removed only with no marks left and no save running.
//! - Only the simulation thread removes regions from primary storage.

mod cached;
mod context;
mod drain;
mod locks;
mod pipeline;

pub use context::CacheContext;
pub use drain::DrainReport;
pub use pipeline::{Completion, Step};

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::StoreConfig;
use crate::coord::RegionCoord;
use crate::error::{StoreError, StoreResult};
use crate::io::{RegionGenerator, RegionLoader, WorldHooks};
use crate::lifecycle::{SaveStage, SimulationThread};
use crate::region::{PendingStructure, Region, StructureTile};

use cached::CachedRegion;
use drain::SaveTracker;
use locks::StripedLocks;

/// Snapshot of store bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Simulation ticks run so far.
    pub age: u64,
    /// Regions in primary storage.
    pub primary: usize,
    /// Entries in cache storage.
    pub cached: usize,
    /// Regions waiting to be promoted to primary storage.
    pub pending_primary: usize,
    /// Save chains running.
    pub saves_in_flight: usize,
    /// Regions whose load or generation failed.
    pub stuck: usize,
}

/// What one `update()` did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Simulation age after this tick.
    pub age: u64,
    /// Regions newly counted in their neighbours' prepared counts.
    pub linked: usize,
    /// Regions imported into the live simulation.
    pub imported: usize,
    /// Active regions ticked.
    pub ticked: usize,
    /// Regions evicted from primary storage.
    pub evicted: usize,
}

pub(crate) struct StoreInner {
    config: StoreConfig,
    primary: DashMap<RegionCoord, Arc<Region>>,
    cache: DashMap<RegionCoord, CachedRegion>,
    locks: StripedLocks,
    loader: Arc<dyn RegionLoader>,
    generator: Arc<dyn RegionGenerator>,
    hooks: Arc<dyn WorldHooks>,
    saves: SaveTracker,
    stuck: Mutex<HashSet<RegionCoord>>,
    pending_primary: AtomicUsize,
    age: AtomicU64,
    simulation_claimed: AtomicBool,
}

/// The concurrent region streaming store.
///
/// Cheap to clone; clones share the same storage. Hand one to every
/// worker that needs incidental region access.
///
/// ## Usage
///
/// ```rust,ignore
/// let store = RegionStore::new(config, loader, generator, hooks);
/// let sim = store.claim_simulation()?;
///
/// store.anchor_region(&sim, RegionCoord::new(0, 0));
/// loop {
///     store.update(&sim);
///     if store.is_loaded() { /* ... */ }
/// }
/// ```
#[derive(Clone)]
pub struct RegionStore {
    inner: Arc<StoreInner>,
}

impl RegionStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new(
        config: StoreConfig,
        loader: Arc<dyn RegionLoader>,
        generator: Arc<dyn RegionGenerator>,
        hooks: Arc<dyn WorldHooks>,
    ) -> Self {
        let config = config.sanitized();
        Self {
            inner: Arc::new(StoreInner {
                locks: StripedLocks::new(config.lock_stripes),
                config,
                primary: DashMap::new(),
                cache: DashMap::new(),
                loader,
                generator,
                hooks,
                saves: SaveTracker::default(),
                stuck: Mutex::new(HashSet::new()),
                pending_primary: AtomicUsize::new(0),
                age: AtomicU64::new(0),
                simulation_claimed: AtomicBool::new(false),
            }),
        }
    }

    /// Hands out the simulation-thread token. Succeeds once per store.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::SimulationAlreadyClaimed`] on every later call.
    pub fn claim_simulation(&self) -> StoreResult<SimulationThread> {
        if self.inner.simulation_claimed.swap(true, Ordering::AcqRel) {
            return Err(StoreError::SimulationAlreadyClaimed);
        }
        Ok(SimulationThread::new())
    }

    /// The store's configuration.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ------------------------------------------------------------------
    // Simulation thread
    // ------------------------------------------------------------------

    /// Declares that `coord` must stay resident and simulated.
    ///
    /// On the first anchor the 3x3 block around it is requested for
    /// primary storage (load + generate for all nine) and every neighbour
    /// counts one more anchored neighbour. Never blocks on I/O.
    pub fn anchor_region(&self, sim: &SimulationThread, coord: RegionCoord) {
        let region = self.load_region(coord);
        if !region.lifecycle().anchor(sim) {
            return;
        }
        let delay = self.inner.config.unload_delay_ticks;
        for n in coord.neighbours() {
            self.load_region(n)
                .lifecycle()
                .add_anchored_neighbour(sim, delay);
        }
        tracing::debug!("region {coord}: anchored");
    }

    /// Removes one anchor from `coord`. On the last one, the neighbours
    /// count one fewer anchored neighbour.
    pub fn deanchor_region(&self, sim: &SimulationThread, coord: RegionCoord) {
        let Some(region) = self.resident(coord) else {
            tracing::warn!("region {coord}: de-anchor of a region that is not resident");
            return;
        };
        let delay = self.inner.config.unload_delay_ticks;
        match region.lifecycle().deanchor(sim) {
            Ok(false) => {}
            Ok(true) => {
                region.lifecycle().reset_unload_countdown(sim, delay);
                for n in coord.neighbours() {
                    let Some(neighbour) = self.resident(n) else {
                        tracing::warn!("region {n}: anchored neighbour of {coord} is not resident");
                        continue;
                    };
                    if let Err(e) = neighbour.lifecycle().remove_anchored_neighbour(sim, delay) {
                        tracing::warn!("region {n}: {e}");
                    }
                }
                tracing::debug!("region {coord}: de-anchored");
            }
            Err(e) => tracing::warn!("region {coord}: de-anchor rejected: {e}"),
        }
    }

    /// Advances every primary region by one tick and evicts cold ones.
    pub fn update(&self, sim: &SimulationThread) -> TickReport {
        let inner = &self.inner;
        let age = inner.age.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = TickReport {
            age,
            ..TickReport::default()
        };

        let regions: Vec<Arc<Region>> =
            inner.primary.iter().map(|e| Arc::clone(e.value())).collect();

        for region in &regions {
            if !region.lifecycle().is_linked() {
                self.link(sim, region);
                report.linked += 1;
            }
        }

        let mut cold = Vec::new();
        for region in regions {
            let state = region.lifecycle();
            if state.try_import(sim) {
                inner.hooks.on_import(&region);
                report.imported += 1;
            }
            if region.has_pending_structures() {
                region.implant_pending_structures();
            }
            if state.is_active() {
                inner.hooks.tick_region(&region, age);
                report.ticked += 1;
            }
            if region.is_dirty()
                && age.saturating_sub(region.last_saved_age()) >= inner.config.autosave_interval_ticks
            {
                self.request_save(&region);
            }
            if state.is_unanchored() && state.tick_down(sim) {
                cold.push(region);
            }
        }

        for region in cold {
            self.evict(sim, &region);
            report.evicted += 1;
        }
        report
    }

    /// Requests a save of every primary region. Returns immediately.
    pub fn save_all(&self, _sim: &SimulationThread) {
        let regions: Vec<Arc<Region>> = self
            .inner
            .primary
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        for region in &regions {
            self.request_save(region);
        }
        tracing::info!("save requested for {} primary regions", regions.len());
    }

    /// True iff every primary region is prepared and none is still on its
    /// way to primary storage.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.inner.pending_primary.load(Ordering::Acquire) == 0
            && self
                .inner
                .primary
                .iter()
                .all(|e| e.value().lifecycle().is_prepared())
    }

    /// True if `coord` is in primary storage and active.
    #[must_use]
    pub fn is_active(&self, coord: RegionCoord) -> bool {
        self.inner
            .primary
            .get(&coord)
            .is_some_and(|r| r.lifecycle().is_active())
    }

    /// Evicts every primary region with a final save, then waits for all
    /// saves within the configured budget.
    pub fn shutdown(&self, sim: &SimulationThread) -> DrainReport {
        let regions: Vec<Arc<Region>> = self
            .inner
            .primary
            .iter()
            .map(|e| Arc::clone(e.value()))
            .collect();
        tracing::info!("shutting down: evicting {} primary regions", regions.len());
        for region in &regions {
            self.evict(sim, region);
        }
        self.wait_for_saves(self.inner.config.drain_timeout())
    }

    fn link(&self, sim: &SimulationThread, region: &Arc<Region>) {
        for n in region.coord().neighbours() {
            if let Some(neighbour) = self.inner.primary.get(&n) {
                if neighbour.lifecycle().is_linked() {
                    neighbour.lifecycle().add_prepared_neighbour();
                    region.lifecycle().add_prepared_neighbour();
                }
            }
        }
        region.lifecycle().set_linked(sim, true);
    }

    fn unlink(&self, sim: &SimulationThread, region: &Arc<Region>) {
        if !region.lifecycle().set_linked(sim, false) {
            return;
        }
        for n in region.coord().neighbours() {
            if let Some(neighbour) = self.inner.primary.get(&n) {
                if neighbour.lifecycle().is_linked() {
                    let dropped = neighbour
                        .lifecycle()
                        .remove_prepared_neighbour()
                        .and_then(|()| region.lifecycle().remove_prepared_neighbour());
                    if let Err(e) = dropped {
                        tracing::error!("region {}: prepared neighbour count: {e}", region.coord());
                    }
                }
            }
        }
    }

    fn evict(&self, sim: &SimulationThread, region: &Arc<Region>) {
        let inner = &self.inner;
        let coord = region.coord();
        inner.hooks.on_evict(region);
        region.lifecycle().mark_removed_from_world(sim);
        self.unlink(sim, region);

        let action = {
            let _stripe = inner.locks.lock(coord);
            inner.primary.remove(&coord);
            let saving = region.lifecycle().save_stage() != SaveStage::NotSaving;
            if region.is_dirty() || saving {
                // The save mark keeps the region findable until it is written.
                match inner.cache.get_mut(&coord) {
                    Some(mut entry) => {
                        if !entry.save_mark {
                            entry.mark();
                            entry.save_mark = true;
                        }
                    }
                    None => {
                        let mut entry = CachedRegion::new(Arc::clone(region), 1, false);
                        entry.save_mark = true;
                        inner.cache.insert(coord, entry);
                    }
                }
                inner.begin_save(region)
            } else {
                None
            }
        };
        if let Some(action) = action {
            inner.dispatch(action);
        }
        tracing::debug!("region {coord}: evicted from primary storage");
    }

    /// Requests primary-storage placement of `coord` and returns its region.
    fn load_region(&self, coord: RegionCoord) -> Arc<Region> {
        let inner = &self.inner;
        let (region, action) = {
            let _stripe = inner.locks.lock(coord);
            if let Some(region) = inner.primary.get(&coord) {
                return Arc::clone(region.value());
            }
            if let Some(mut entry) = inner.cache.get_mut(&coord) {
                if !entry.prepare_for_primary {
                    entry.prepare_for_primary = true;
                    entry.mark();
                    inner.pending_primary.fetch_add(1, Ordering::AcqRel);
                }
                return Arc::clone(&entry.region);
            }
            inner.insert_fresh(coord, true)
        };
        inner.dispatch(action);
        region
    }

    /// Saves a region outside the pipeline (autosave, `save_all`).
    pub fn request_save(&self, region: &Arc<Region>) {
        if let Some(action) = self.inner.begin_save(region) {
            self.inner.dispatch(action);
        }
    }

    // ------------------------------------------------------------------
    // Any thread
    // ------------------------------------------------------------------

    /// Borrows a region for incidental access from any thread.
    ///
    /// The region may be in any stage; callers needing a prepared region
    /// must check. Repeated calls through one context return the same
    /// region and take one mark. Release with [`uncache_all`](Self::uncache_all).
    pub fn cache(&self, ctx: &mut CacheContext, coord: RegionCoord) -> Arc<Region> {
        if let Some(region) = ctx.held.get(&coord) {
            return Arc::clone(region);
        }
        let inner = &self.inner;
        let (region, action) = {
            let _stripe = inner.locks.lock(coord);
            let cached = inner.cache.get_mut(&coord).map(|mut entry| {
                entry.mark();
                Arc::clone(&entry.region)
            });
            if let Some(region) = cached {
                (region, None)
            } else if let Some(region) = inner.primary.get(&coord).map(|r| Arc::clone(r.value())) {
                inner
                    .cache
                    .insert(coord, CachedRegion::new(Arc::clone(&region), 1, false));
                (region, None)
            } else {
                let (region, action) = inner.insert_fresh(coord, false);
                (region, Some(action))
            }
        };
        if let Some(action) = action {
            inner.dispatch(action);
        }
        ctx.held.insert(coord, Arc::clone(&region));
        region
    }

    /// Releases every region `ctx` holds. A no-op on an empty context.
    pub fn uncache_all(&self, ctx: &mut CacheContext) {
        let inner = &self.inner;
        for (coord, _region) in ctx.held.drain() {
            let actions = {
                let _stripe = inner.locks.lock(coord);
                inner.release_locked(coord)
            };
            inner.dispatch_all(actions);
        }
    }

    /// Splits a world-space structure across the regions it touches,
    /// caches each through `ctx`, and queues the matching part on it.
    ///
    /// Returns the number of regions the structure was queued on.
    pub fn queue_structure(
        &self,
        ctx: &mut CacheContext,
        origin_x: i64,
        origin_y: i64,
        tiles: &[StructureTile],
    ) -> usize {
        let mut parts: HashMap<RegionCoord, Vec<StructureTile>> = HashMap::new();
        for t in tiles {
            let wx = origin_x.saturating_add(i64::from(t.dx));
            let wy = origin_y.saturating_add(i64::from(t.dy));
            parts
                .entry(RegionCoord::from_tile_pos(wx, wy))
                .or_default()
                .push(*t);
        }
        let touched = parts.len();
        for (coord, part) in parts {
            let region = self.cache(ctx, coord);
            region.queue_structure(PendingStructure::new(origin_x, origin_y, part));
        }
        touched
    }

    /// Blocks until every save chain has finished or `timeout` elapses.
    ///
    /// Offending regions are logged and returned; never fails.
    pub fn wait_for_saves(&self, timeout: Duration) -> DrainReport {
        let report = self.inner.saves.wait(timeout);
        if !report.is_clean() {
            tracing::warn!(
                "{} regions did not finish saving within {:?}: {:?}",
                report.unsettled.len(),
                timeout,
                report.unsettled
            );
        }
        report
    }

    // ------------------------------------------------------------------
    // Lookups and diagnostics
    // ------------------------------------------------------------------

    /// The region for `coord` if it is in primary or cache storage.
    #[must_use]
    pub fn resident(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        let _stripe = self.inner.locks.lock(coord);
        self.inner
            .primary
            .get(&coord)
            .map(|r| Arc::clone(r.value()))
            .or_else(|| self.inner.cache.get(&coord).map(|e| Arc::clone(&e.region)))
    }

    /// The region for `coord` if it is in primary storage.
    #[must_use]
    pub fn primary_region(&self, coord: RegionCoord) -> Option<Arc<Region>> {
        self.inner.primary.get(&coord).map(|r| Arc::clone(r.value()))
    }

    /// True if `coord` is in primary storage.
    #[must_use]
    pub fn is_primary(&self, coord: RegionCoord) -> bool {
        self.inner.primary.contains_key(&coord)
    }

    /// Marks held by the cache entry for `coord`, if there is one.
    #[must_use]
    pub fn cache_marks(&self, coord: RegionCoord) -> Option<u32> {
        let _stripe = self.inner.locks.lock(coord);
        self.inner.cache.get(&coord).map(|e| e.times_cached)
    }

    /// Coordinates currently in primary storage, sorted.
    #[must_use]
    pub fn primary_coords(&self) -> Vec<RegionCoord> {
        let mut coords: Vec<_> = self.inner.primary.iter().map(|e| *e.key()).collect();
        coords.sort_unstable();
        coords
    }

    /// Regions whose load or generation failed, sorted.
    #[must_use]
    pub fn stuck_regions(&self) -> Vec<RegionCoord> {
        let mut coords: Vec<_> = self.inner.stuck.lock().iter().copied().collect();
        coords.sort_unstable();
        coords
    }

    /// Current bookkeeping counters.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            age: self.inner.age.load(Ordering::Relaxed),
            primary: self.inner.primary.len(),
            cached: self.inner.cache.len(),
            pending_primary: self.inner.pending_primary.load(Ordering::Acquire),
            saves_in_flight: self.inner.saves.in_flight(),
            stuck: self.inner.stuck.lock().len(),
        }
    }
}
