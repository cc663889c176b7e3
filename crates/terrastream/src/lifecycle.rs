//! # Region Lifecycle State Machine
//!
//! Every region moves through a one-way pipeline of stages, a save cycle,
//! and a set of anchor/neighbour counters that decide whether it is
//! simulated and when it may be evicted.
//!
//! ## Stages
//!
//! ```text
//!   New ──> Loading ──> Loaded ──> Generating ──> Prepared
//!                 │         │                        ▲
//!                 └─────────┴────────────────────────┘
//!                   (already generated on disk, nothing queued)
//! ```
//!
//! ## Save cycle
//!
//! ```text
//!   NotSaving ──request──> Saving ──finish──> NotSaving
//!                            │  ▲
//!                  request   │  │ finish (save again)
//!                            ▼  │
//!                         SaveQueued
//! ```
//!
//! ## Who writes what
//!
//! | Field                     | Writers                         |
//! |---------------------------|---------------------------------|
//! | `stage`, `generated`      | the worker holding the permit   |
//! | `save_stage`              | any thread, indivisible CAS     |
//! | `prepared_neighbours`     | any thread                      |
//! | `anchors`                 | simulation thread only          |
//! | `anchored_neighbours`     | simulation thread only          |
//! | `ticks_to_unload`         | simulation thread only          |
//! | `imported`, `linked`      | simulation thread only          |
//!
//! Simulation-only writers take a [`SimulationThread`] token, which cannot
//! leave the thread it was claimed on.

use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};

use crate::error::LifecycleError;

/// Number of 8-connected neighbours.
pub const NEIGHBOUR_COUNT: u32 = 8;

/// Pipeline stage of a region. Only ever moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Stage {
    /// Constructed, nothing requested yet.
    New = 0,
    /// A loader holds the load permit.
    Loading = 1,
    /// Loaded from storage, generation still required.
    Loaded = 2,
    /// A generator holds the generate permit.
    Generating = 3,
    /// Loaded and generated; safe to simulate.
    Prepared = 4,
}

impl Stage {
    #[inline]
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Loading,
            2 => Self::Loaded,
            3 => Self::Generating,
            _ => Self::Prepared,
        }
    }
}

/// Save sub-state of a region.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SaveStage {
    /// No save in flight.
    NotSaving = 0,
    /// One save in flight.
    Saving = 1,
    /// A save is in flight and another was requested meanwhile.
    SaveQueued = 2,
}

impl SaveStage {
    #[inline]
    const fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::NotSaving,
            1 => Self::Saving,
            _ => Self::SaveQueued,
        }
    }
}

/// Proof that the caller is the store's simulation thread.
///
/// Claimed once per store through
/// [`RegionStore::claim_simulation`](crate::RegionStore::claim_simulation).
/// The token is neither `Send` nor `Sync`, so it stays on the thread that
/// claimed it.
#[derive(Debug)]
pub struct SimulationThread {
    _not_send: PhantomData<*const ()>,
}

impl SimulationThread {
    pub(crate) const fn new() -> Self {
        Self {
            _not_send: PhantomData,
        }
    }
}

/// Point-in-time copy of a lifecycle, for diagnostics and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    /// Pipeline stage.
    pub stage: Stage,
    /// Save sub-state.
    pub save_stage: SaveStage,
    /// Whether generation has completed at some point.
    pub generated: bool,
    /// Direct anchors on this region.
    pub anchors: u32,
    /// Anchored neighbours.
    pub anchored_neighbours: u32,
    /// Prepared, resident neighbours.
    pub prepared_neighbours: u32,
    /// Whether contents were imported into the live simulation.
    pub imported: bool,
    /// Remaining unload countdown.
    pub ticks_to_unload: u32,
}

/// Per-region lifecycle state, shared by every thread touching the region.
#[derive(Debug)]
pub struct RegionLifecycleState {
    stage: AtomicU8,
    save_stage: AtomicU8,
    generated: AtomicBool,
    anchors: AtomicU32,
    anchored_neighbours: AtomicU32,
    prepared_neighbours: AtomicU32,
    // Cache of `prepared_neighbours == 8`. May be one update stale.
    all_neighbours_prepared: AtomicBool,
    imported: AtomicBool,
    linked: AtomicBool,
    ticks_to_unload: AtomicU32,
}

impl RegionLifecycleState {
    /// Creates a lifecycle in `New` with a full unload countdown.
    #[must_use]
    pub const fn new(unload_delay_ticks: u32) -> Self {
        Self {
            stage: AtomicU8::new(Stage::New as u8),
            save_stage: AtomicU8::new(SaveStage::NotSaving as u8),
            generated: AtomicBool::new(false),
            anchors: AtomicU32::new(0),
            anchored_neighbours: AtomicU32::new(0),
            prepared_neighbours: AtomicU32::new(0),
            all_neighbours_prepared: AtomicBool::new(false),
            imported: AtomicBool::new(false),
            linked: AtomicBool::new(false),
            ticks_to_unload: AtomicU32::new(unload_delay_ticks),
        }
    }

    // ------------------------------------------------------------------
    // Stage
    // ------------------------------------------------------------------

    /// Current pipeline stage.
    #[inline]
    #[must_use]
    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Acquire))
    }

    /// True once the region reached `Prepared`.
    #[inline]
    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.stage() == Stage::Prepared
    }

    /// True once generation completed, whether here or in a previous session.
    #[inline]
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generated.load(Ordering::Acquire)
    }

    fn advance(&self, from: Stage, to: Stage) -> Result<(), Stage> {
        self.stage
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(Stage::from_u8)
    }

    /// `New -> Loading`. Succeeds at most once per region.
    ///
    /// The winner must hand the region to the loader.
    pub fn try_begin_load(&self) -> bool {
        self.advance(Stage::New, Stage::Loading).is_ok()
    }

    /// `Loading -> Loaded`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::IllegalStage`] if the region is not loading.
    pub fn mark_loaded(&self) -> Result<(), LifecycleError> {
        self.advance(Stage::Loading, Stage::Loaded)
            .map_err(|found| LifecycleError::IllegalStage {
                target: Stage::Loaded,
                found,
            })
    }

    /// `Loaded -> Generating`. The winner must hand the region to the generator.
    pub fn try_begin_generate(&self) -> bool {
        self.advance(Stage::Loaded, Stage::Generating).is_ok()
    }

    /// Records that the region's contents are generated.
    ///
    /// From `Loading`/`Loaded` (the loader found generated data) the region
    /// becomes `Prepared`, unless structures are still queued against it,
    /// in which case it rests in `Loaded` so a generation pass implants
    /// them. From `Generating` it always becomes `Prepared`.
    ///
    /// Returns the stage reached.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::IllegalStage`] from `New` or `Prepared`;
    /// the stage is left untouched.
    pub fn mark_generated(&self, has_queued_structures: bool) -> Result<Stage, LifecycleError> {
        let mut current = self.stage.load(Ordering::Acquire);
        loop {
            let next = match Stage::from_u8(current) {
                Stage::Loading | Stage::Loaded if has_queued_structures => Stage::Loaded,
                Stage::Loading | Stage::Loaded | Stage::Generating => Stage::Prepared,
                found => {
                    return Err(LifecycleError::IllegalStage {
                        target: Stage::Prepared,
                        found,
                    })
                }
            };
            match self.stage.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.generated.store(true, Ordering::Release);
                    return Ok(next);
                }
                Err(actual) => current = actual,
            }
        }
    }

    // ------------------------------------------------------------------
    // Save cycle
    // ------------------------------------------------------------------

    /// Current save sub-state.
    #[inline]
    #[must_use]
    pub fn save_stage(&self) -> SaveStage {
        SaveStage::from_u8(self.save_stage.load(Ordering::Acquire))
    }

    /// Requests a save.
    ///
    /// Returns true if the caller must perform the save (`NotSaving ->
    /// Saving`). While a save is running the request is folded into one
    /// queued re-save and false is returned.
    pub fn try_begin_save(&self) -> bool {
        let mut current = self.save_stage.load(Ordering::Acquire);
        loop {
            let (next, begin) = match SaveStage::from_u8(current) {
                SaveStage::NotSaving => (SaveStage::Saving, true),
                SaveStage::Saving | SaveStage::SaveQueued => (SaveStage::SaveQueued, false),
            };
            match self.save_stage.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return begin,
                Err(actual) => current = actual,
            }
        }
    }

    /// Finishes the running save.
    ///
    /// Returns true if a save was queued meanwhile and must run again
    /// (`SaveQueued -> Saving`), false once the region is idle.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::IllegalSaveStage`] if no save was running.
    pub fn finish_save(&self) -> Result<bool, LifecycleError> {
        let mut current = self.save_stage.load(Ordering::Acquire);
        loop {
            let (next, again) = match SaveStage::from_u8(current) {
                SaveStage::SaveQueued => (SaveStage::Saving, true),
                SaveStage::Saving => (SaveStage::NotSaving, false),
                found @ SaveStage::NotSaving => {
                    return Err(LifecycleError::IllegalSaveStage { found })
                }
            };
            match self.save_stage.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(again),
                Err(actual) => current = actual,
            }
        }
    }

    // ------------------------------------------------------------------
    // Anchors (simulation thread)
    // ------------------------------------------------------------------

    /// Direct anchors placed on this region.
    #[inline]
    #[must_use]
    pub fn anchors(&self) -> u32 {
        self.anchors.load(Ordering::Relaxed)
    }

    /// Neighbours that are themselves anchored.
    #[inline]
    #[must_use]
    pub fn anchored_neighbours(&self) -> u32 {
        self.anchored_neighbours.load(Ordering::Relaxed)
    }

    /// Adds an anchor. Returns true on the 0 -> 1 edge.
    pub fn anchor(&self, _sim: &SimulationThread) -> bool {
        self.anchors.fetch_add(1, Ordering::Relaxed) == 0
    }

    /// Removes an anchor. Returns true on the 1 -> 0 edge.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AnchorUnderflow`] if the region has no anchors.
    pub fn deanchor(&self, _sim: &SimulationThread) -> Result<bool, LifecycleError> {
        let anchors = self.anchors.load(Ordering::Relaxed);
        if anchors == 0 {
            return Err(LifecycleError::AnchorUnderflow);
        }
        self.anchors.store(anchors - 1, Ordering::Relaxed);
        Ok(anchors == 1)
    }

    /// Counts one more anchored neighbour.
    pub fn add_anchored_neighbour(&self, sim: &SimulationThread, unload_delay_ticks: u32) {
        if self.anchored_neighbours.fetch_add(1, Ordering::Relaxed) == 0 {
            self.reset_unload_countdown(sim, unload_delay_ticks);
        }
    }

    /// Counts one fewer anchored neighbour; the last removal restarts the
    /// unload countdown.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AnchorUnderflow`] if the count is already zero.
    pub fn remove_anchored_neighbour(
        &self,
        sim: &SimulationThread,
        unload_delay_ticks: u32,
    ) -> Result<(), LifecycleError> {
        let count = self.anchored_neighbours.load(Ordering::Relaxed);
        if count == 0 {
            return Err(LifecycleError::AnchorUnderflow);
        }
        self.anchored_neighbours.store(count - 1, Ordering::Relaxed);
        if count == 1 {
            self.reset_unload_countdown(sim, unload_delay_ticks);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Prepared neighbours (any thread)
    // ------------------------------------------------------------------

    /// Prepared neighbours currently counted.
    #[inline]
    #[must_use]
    pub fn prepared_neighbours(&self) -> u32 {
        self.prepared_neighbours.load(Ordering::Relaxed)
    }

    /// Cached `prepared_neighbours == 8`.
    #[inline]
    #[must_use]
    pub fn all_neighbours_prepared(&self) -> bool {
        self.all_neighbours_prepared.load(Ordering::Relaxed)
    }

    /// Counts one more prepared neighbour.
    pub fn add_prepared_neighbour(&self) {
        let count = self.prepared_neighbours.fetch_add(1, Ordering::Relaxed) + 1;
        debug_assert!(count <= NEIGHBOUR_COUNT, "more than 8 prepared neighbours");
        self.all_neighbours_prepared
            .store(count == NEIGHBOUR_COUNT, Ordering::Relaxed);
    }

    /// Counts one fewer prepared neighbour.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AnchorUnderflow`] if the count is already zero.
    pub fn remove_prepared_neighbour(&self) -> Result<(), LifecycleError> {
        self.prepared_neighbours
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .map_err(|_| LifecycleError::AnchorUnderflow)?;
        self.all_neighbours_prepared.store(false, Ordering::Relaxed);
        Ok(())
    }

    /// Anchored and surrounded by eight prepared neighbours.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.anchors() > 0 && self.all_neighbours_prepared()
    }

    // ------------------------------------------------------------------
    // Residency (simulation thread)
    // ------------------------------------------------------------------

    /// Neither anchored nor next to an anchored region.
    #[inline]
    #[must_use]
    pub fn is_unanchored(&self) -> bool {
        self.anchors() == 0 && self.anchored_neighbours() == 0
    }

    /// Remaining unload countdown.
    #[inline]
    #[must_use]
    pub fn ticks_to_unload(&self) -> u32 {
        self.ticks_to_unload.load(Ordering::Relaxed)
    }

    /// Restarts the unload countdown.
    pub fn reset_unload_countdown(&self, _sim: &SimulationThread, ticks: u32) {
        self.ticks_to_unload.store(ticks, Ordering::Relaxed);
    }

    /// Advances the unload countdown by one tick. Returns true once it has
    /// elapsed; the caller should then try to evict.
    pub fn tick_down(&self, _sim: &SimulationThread) -> bool {
        let ticks = self.ticks_to_unload.load(Ordering::Relaxed);
        if ticks == 0 {
            return true;
        }
        self.ticks_to_unload.store(ticks - 1, Ordering::Relaxed);
        ticks == 1
    }

    /// Returns true exactly once per residency episode.
    pub fn try_import(&self, _sim: &SimulationThread) -> bool {
        !self.imported.swap(true, Ordering::Relaxed)
    }

    /// Whether contents are merged into the live simulation.
    #[inline]
    #[must_use]
    pub fn is_imported(&self) -> bool {
        self.imported.load(Ordering::Relaxed)
    }

    /// Ends the residency episode; the next one imports again.
    pub fn mark_removed_from_world(&self, _sim: &SimulationThread) {
        self.imported.store(false, Ordering::Relaxed);
    }

    /// Sets whether the region is counted in its neighbours' prepared
    /// counts. Returns the previous value.
    pub(crate) fn set_linked(&self, _sim: &SimulationThread, linked: bool) -> bool {
        self.linked.swap(linked, Ordering::Relaxed)
    }

    /// Whether the region is counted in its neighbours' prepared counts.
    #[inline]
    pub(crate) fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Relaxed)
    }

    /// Copies every field.
    #[must_use]
    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            stage: self.stage(),
            save_stage: self.save_stage(),
            generated: self.is_generated(),
            anchors: self.anchors(),
            anchored_neighbours: self.anchored_neighbours(),
            prepared_neighbours: self.prepared_neighbours(),
            imported: self.is_imported(),
            ticks_to_unload: self.ticks_to_unload(),
        }
    }
}
