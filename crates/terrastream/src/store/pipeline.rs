//! # Region Pipeline
//!
//! Drives a region through `Loading -> (Generating) -> Saving -> Primary`.
//!
//! Every collaborator finishes through a [`Completion`], which lands in
//! one transition function, [`StoreInner::advance`]. It takes the
//! coordinate's stripe lock, decides the next step from the lifecycle and
//! the cache entry, and returns the work to dispatch once the lock is
//! released (collaborators may complete inline and re-enter the store).
//!
//! ## Marks
//!
//! ```text
//!   fresh region            load mark + requester mark
//!   load done, generate     load mark carries over to generation
//!   generate done           generate mark carries over to the save
//!   save chain idle         save mark released
//!   count == 1, primary     promoted (the primary mark is consumed)
//!   count == 0              saved if dirty, else dropped from cache
//! ```

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::coord::RegionCoord;
use crate::lifecycle::{SaveStage, Stage};
use crate::region::Region;
use crate::store::cached::CachedRegion;
use crate::store::StoreInner;

/// Asynchronous step a collaborator performs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Step {
    /// Loader populating the region from storage.
    Load,
    /// Generator filling the region.
    Generate,
    /// Loader persisting the region.
    Save,
}

/// Work decided under a stripe lock, run after it is released.
pub(crate) enum Action {
    Load {
        region: Arc<Region>,
        for_simulation: bool,
    },
    Generate(Arc<Region>),
    Save {
        region: Arc<Region>,
        is_final: bool,
    },
}

/// Completion handle for one collaborator step.
///
/// Consumed by [`complete`](Self::complete), so the store hears back
/// exactly once. Dropping it without completing counts as a failure.
#[must_use = "a dropped Completion reports the step as failed"]
pub struct Completion {
    store: Arc<StoreInner>,
    region: Arc<Region>,
    step: Step,
    completed: bool,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Completion")
            .field("coord", &self.region.coord())
            .field("step", &self.step)
            .finish_non_exhaustive()
    }
}

impl Completion {
    pub(crate) fn new(store: Arc<StoreInner>, region: Arc<Region>, step: Step) -> Self {
        Self {
            store,
            region,
            step,
            completed: false,
        }
    }

    /// The region this step works on.
    #[must_use]
    pub fn region(&self) -> &Arc<Region> {
        &self.region
    }

    /// The step being completed.
    #[must_use]
    pub const fn step(&self) -> Step {
        self.step
    }

    /// Reports the outcome to the store.
    pub fn complete(mut self, success: bool) {
        self.completed = true;
        self.store.advance(&self.region, self.step, success);
    }

    /// Reports success.
    pub fn succeed(self) {
        self.complete(true);
    }

    /// Reports failure.
    pub fn fail(self) {
        self.complete(false);
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        if !self.completed {
            tracing::warn!(
                "region {}: {:?} completion dropped without being completed",
                self.region.coord(),
                self.step
            );
            self.completed = true;
            self.store.advance(&self.region, self.step, false);
        }
    }
}

impl StoreInner {
    /// Hands work to the collaborators. Never called under a stripe lock.
    pub(crate) fn dispatch(self: &Arc<Self>, action: Action) {
        match action {
            Action::Load {
                region,
                for_simulation,
            } => {
                tracing::debug!("region {}: load dispatched", region.coord());
                let done = Completion::new(Arc::clone(self), Arc::clone(&region), Step::Load);
                self.loader.load(region, for_simulation, done);
            }
            Action::Generate(region) => {
                tracing::debug!("region {}: generation dispatched", region.coord());
                let done = Completion::new(Arc::clone(self), Arc::clone(&region), Step::Generate);
                self.generator.generate(region, done);
            }
            Action::Save { region, is_final } => {
                tracing::debug!("region {}: save dispatched (final: {is_final})", region.coord());
                let done = Completion::new(Arc::clone(self), Arc::clone(&region), Step::Save);
                self.loader.save(region, is_final, done);
            }
        }
    }

    pub(crate) fn dispatch_all(self: &Arc<Self>, actions: Vec<Action>) {
        for action in actions {
            self.dispatch(action);
        }
    }

    /// The transition function every completed step runs through.
    pub(crate) fn advance(self: &Arc<Self>, region: &Arc<Region>, step: Step, success: bool) {
        let coord = region.coord();
        let actions = {
            let _stripe = self.locks.lock(coord);
            match step {
                Step::Load => self.after_load(region, success),
                Step::Generate => self.after_generate(region, success),
                Step::Save => self.after_save(region, success),
            }
        };
        self.dispatch_all(actions);
    }

    fn mark_stuck(&self, coord: RegionCoord) {
        self.stuck.lock().insert(coord);
    }

    fn after_load(&self, region: &Arc<Region>, success: bool) -> Vec<Action> {
        let coord = region.coord();
        let state = region.lifecycle();
        if !success {
            // The load mark stays: the region is pinned in cache, stuck.
            tracing::error!("region {coord}: load failed, region stuck in {:?}", state.stage());
            self.mark_stuck(coord);
            return Vec::new();
        }
        if state.stage() == Stage::Loading {
            if let Err(e) = state.mark_loaded() {
                tracing::error!("region {coord}: {e}");
                self.mark_stuck(coord);
                return Vec::new();
            }
        }
        if state.try_begin_generate() {
            // The load mark now stands for the pending generation.
            return vec![Action::Generate(Arc::clone(region))];
        }
        if !state.is_prepared() {
            tracing::error!(
                "region {coord}: load finished in {:?} with no generation permit",
                state.stage()
            );
            self.mark_stuck(coord);
            return Vec::new();
        }
        self.release_locked(coord)
    }

    fn after_generate(&self, region: &Arc<Region>, success: bool) -> Vec<Action> {
        let coord = region.coord();
        let state = region.lifecycle();
        if !success {
            tracing::error!("region {coord}: generation failed, region stuck in {:?}", state.stage());
            self.mark_stuck(coord);
            return Vec::new();
        }
        if let Err(e) = state.mark_generated(false) {
            tracing::error!("region {coord}: {e}");
            self.mark_stuck(coord);
            return Vec::new();
        }
        region.mark_dirty();
        self.convert_to_save(coord, region)
    }

    fn after_save(&self, region: &Arc<Region>, success: bool) -> Vec<Action> {
        let coord = region.coord();
        if success {
            self.stuck.lock().remove(&coord);
        } else {
            tracing::error!("region {coord}: save failed, region kept resident and dirty");
            region.mark_dirty();
            self.mark_stuck(coord);
        }
        match region.lifecycle().finish_save() {
            Ok(true) => return vec![self.save_action(region)],
            Ok(false) => {}
            Err(e) => tracing::error!("region {coord}: {e}"),
        }
        self.saves.end(coord);
        if !success {
            // The save mark stays: the region is pinned in cache, stuck.
            return Vec::new();
        }

        let holds_save_mark = match self.cache.get_mut(&coord) {
            Some(mut entry) if entry.save_mark => {
                entry.save_mark = false;
                true
            }
            _ => false,
        };
        if holds_save_mark {
            self.release_locked(coord)
        } else {
            Vec::new()
        }
    }

    /// Turns the mark of the step that just finished into a save mark and
    /// requests the save.
    fn convert_to_save(&self, coord: RegionCoord, region: &Arc<Region>) -> Vec<Action> {
        let adopted = match self.cache.get_mut(&coord) {
            Some(mut entry) => {
                if entry.save_mark {
                    false
                } else {
                    entry.save_mark = true;
                    true
                }
            }
            None => {
                tracing::error!("region {coord}: pipeline step finished with no cache entry");
                return Vec::new();
            }
        };
        let mut actions: Vec<Action> = self.begin_save(region).into_iter().collect();
        if !adopted {
            // A save mark already exists; this one is surplus.
            actions.extend(self.release_locked(coord));
        }
        actions
    }

    /// Requests a save; returns the work if this caller must perform it.
    pub(crate) fn begin_save(&self, region: &Arc<Region>) -> Option<Action> {
        if region.lifecycle().try_begin_save() {
            self.saves.begin(region.coord());
            Some(self.save_action(region))
        } else {
            None
        }
    }

    /// Final means the region is neither simulated nor headed for primary
    /// storage. No cache entry guard may be held by the caller.
    fn save_action(&self, region: &Arc<Region>) -> Action {
        let coord = region.coord();
        region.take_dirty();
        region.record_save(self.age.load(Ordering::Relaxed));
        let staying = self.primary.contains_key(&coord)
            || self
                .cache
                .get(&coord)
                .is_some_and(|entry| entry.prepare_for_primary);
        Action::Save {
            region: Arc::clone(region),
            is_final: !staying,
        }
    }

    /// Drops one mark and settles the entry. Stripe lock must be held.
    pub(crate) fn release_locked(&self, coord: RegionCoord) -> Vec<Action> {
        match self.cache.get_mut(&coord) {
            Some(mut entry) => {
                if !entry.unmark() {
                    tracing::error!("region {coord}: cache mark underflow");
                }
            }
            None => {
                tracing::error!("region {coord}: release with no cache entry");
                return Vec::new();
            }
        }
        self.settle(coord)
    }

    /// Decides what happens to a cache entry after its marks changed.
    /// Stripe lock must be held.
    pub(crate) fn settle(&self, coord: RegionCoord) -> Vec<Action> {
        let Some(mut entry) = self.cache.get_mut(&coord) else {
            return Vec::new();
        };
        let region = Arc::clone(&entry.region);
        let state = region.lifecycle();

        if entry.prepare_for_primary && entry.times_cached == 1 {
            if !state.is_prepared() {
                tracing::error!(
                    "region {coord}: promotion to primary requested in stage {:?}",
                    state.stage()
                );
                return Vec::new();
            }
            drop(entry);
            self.promote(coord, region);
            return Vec::new();
        }
        if entry.times_cached > 0 {
            return Vec::new();
        }
        debug_assert!(!entry.prepare_for_primary, "primary request without a mark");

        if self.primary.contains_key(&coord) {
            // Primary storage saves it on its own schedule.
            drop(entry);
            self.cache.remove(&coord);
            return Vec::new();
        }
        if state.save_stage() != SaveStage::NotSaving {
            // Wait for the running save before letting go.
            entry.mark();
            entry.save_mark = true;
            return Vec::new();
        }
        if region.is_dirty() && state.is_prepared() {
            entry.mark();
            entry.save_mark = true;
            drop(entry);
            return self.begin_save(&region).into_iter().collect();
        }
        drop(entry);
        self.cache.remove(&coord);
        tracing::debug!("region {coord}: left cache storage");
        Vec::new()
    }

    /// Moves a prepared region into primary storage. Stripe lock must be held.
    fn promote(&self, coord: RegionCoord, region: Arc<Region>) {
        // Insert before removing so lookups always find it somewhere.
        self.primary.insert(coord, region);
        self.cache.remove(&coord);
        self.pending_primary.fetch_sub(1, Ordering::AcqRel);
        tracing::debug!("region {coord}: promoted to primary storage");
    }

    /// Creates, registers and begins loading a region. Stripe lock must be
    /// held and the coordinate absent from both maps.
    pub(crate) fn insert_fresh(&self, coord: RegionCoord, for_primary: bool) -> (Arc<Region>, Action) {
        let region = Arc::new(Region::new(coord, self.config.unload_delay_ticks));
        let began = region.lifecycle().try_begin_load();
        debug_assert!(began, "fresh region refused its load permit");
        // One mark for the requester, one for the pending load.
        self.cache
            .insert(coord, CachedRegion::new(Arc::clone(&region), 2, for_primary));
        if for_primary {
            self.pending_primary.fetch_add(1, Ordering::AcqRel);
        }
        let action = Action::Load {
            region: Arc::clone(&region),
            for_simulation: for_primary,
        };
        (region, action)
    }
}
