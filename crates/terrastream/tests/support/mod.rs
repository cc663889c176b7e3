//! Scripted collaborators shared by the store integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use terrastream::{
    Completion, NoHooks, Region, RegionCoord, RegionGenerator, RegionLoader, RegionStore, Step,
    StoreConfig, Tile, WorldHooks,
};

/// Tile every generated region gets at (0, 0).
pub const GENERATED_TILE: Tile = Tile::new(7);

/// Loader and generator in one. Either completes work the moment it is
/// handed over (`inline`) or parks it until the test pumps.
#[derive(Default)]
pub struct Scripted {
    inline: bool,
    pending: Mutex<VecDeque<Completion>>,
    /// Coordinates "on disk" as generated.
    pub stored: Mutex<HashSet<RegionCoord>>,
    pub fail_loads: Mutex<HashSet<RegionCoord>>,
    pub fail_generates: Mutex<HashSet<RegionCoord>>,
    pub fail_saves: Mutex<HashSet<RegionCoord>>,
    /// Every finished save as `(coord, is_final)`.
    pub saves: Mutex<Vec<(RegionCoord, bool)>>,
    pub loads: AtomicUsize,
    pub generates: AtomicUsize,
}

impl Scripted {
    pub fn parked() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inline() -> Arc<Self> {
        Arc::new(Self {
            inline: true,
            ..Self::default()
        })
    }

    /// Completions waiting to be pumped.
    pub fn queued(&self) -> usize {
        self.pending.lock().len()
    }

    /// Completes parked work, including work it triggers, until none is left.
    pub fn pump(&self) -> usize {
        self.pump_while(|_| true)
    }

    /// Completes parked work of one step only. Work of other steps stays
    /// parked in order.
    pub fn pump_step(&self, step: Step) -> usize {
        self.pump_while(|c| c.step() == step)
    }

    /// Completes the `index`-th parked completion only. Work it triggers
    /// stays parked. Returns false if there is no such completion.
    pub fn pump_nth(&self, index: usize) -> bool {
        let next = self.pending.lock().remove(index);
        match next {
            Some(completion) => {
                self.finish(completion);
                true
            }
            None => false,
        }
    }

    fn pump_while(&self, wanted: impl Fn(&Completion) -> bool) -> usize {
        let mut done = 0;
        loop {
            let next = {
                let mut pending = self.pending.lock();
                let pos = pending.iter().position(|c| wanted(c));
                pos.and_then(|i| pending.remove(i))
            };
            let Some(completion) = next else {
                return done;
            };
            self.finish(completion);
            done += 1;
        }
    }

    pub fn saves_of(&self, coord: RegionCoord) -> Vec<bool> {
        self.saves
            .lock()
            .iter()
            .filter(|(c, _)| *c == coord)
            .map(|(_, is_final)| *is_final)
            .collect()
    }

    fn park_or_finish(&self, completion: Completion) {
        if self.inline {
            self.finish(completion);
        } else {
            self.pending.lock().push_back(completion);
        }
    }

    fn finish(&self, completion: Completion) {
        let region = Arc::clone(completion.region());
        let coord = region.coord();
        match completion.step() {
            Step::Load => {
                self.loads.fetch_add(1, Ordering::Relaxed);
                if self.fail_loads.lock().contains(&coord) {
                    completion.fail();
                    return;
                }
                if self.stored.lock().contains(&coord) {
                    region
                        .lifecycle()
                        .mark_generated(region.has_pending_structures())
                        .unwrap();
                }
                completion.succeed();
            }
            Step::Generate => {
                self.generates.fetch_add(1, Ordering::Relaxed);
                if self.fail_generates.lock().contains(&coord) {
                    completion.fail();
                    return;
                }
                region.with_payload_mut(|p| p.set_tile(0, 0, GENERATED_TILE));
                region.implant_pending_structures();
                completion.succeed();
            }
            Step::Save => {
                let failed = self.fail_saves.lock().contains(&coord);
                completion.complete(!failed);
            }
        }
    }
}

impl RegionLoader for Scripted {
    fn load(&self, _region: Arc<Region>, _for_simulation: bool, done: Completion) {
        self.park_or_finish(done);
    }

    fn save(&self, region: Arc<Region>, is_final: bool, done: Completion) {
        self.saves.lock().push((region.coord(), is_final));
        self.stored.lock().insert(region.coord());
        self.park_or_finish(done);
    }
}

impl RegionGenerator for Scripted {
    fn generate(&self, _region: Arc<Region>, done: Completion) {
        self.park_or_finish(done);
    }
}

/// Hooks that count their calls.
#[derive(Default)]
pub struct CountingHooks {
    pub imported: AtomicUsize,
    pub evicted: AtomicUsize,
    pub ticked: AtomicUsize,
}

impl WorldHooks for CountingHooks {
    fn on_import(&self, _region: &Region) {
        self.imported.fetch_add(1, Ordering::Relaxed);
    }

    fn on_evict(&self, _region: &Region) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn tick_region(&self, _region: &Region, _age: u64) {
        self.ticked.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn test_config() -> StoreConfig {
    StoreConfig {
        lock_stripes: 16,
        unload_delay_ticks: 3,
        autosave_interval_ticks: 1_000_000,
        drain_timeout_ms: 2_000,
    }
}

pub fn store_with(collab: &Arc<Scripted>) -> RegionStore {
    store_with_hooks(collab, Arc::new(NoHooks))
}

pub fn store_with_hooks(collab: &Arc<Scripted>, hooks: Arc<dyn WorldHooks>) -> RegionStore {
    store_with_config(collab, hooks, test_config())
}

pub fn store_with_config(
    collab: &Arc<Scripted>,
    hooks: Arc<dyn WorldHooks>,
    config: StoreConfig,
) -> RegionStore {
    RegionStore::new(
        config,
        Arc::clone(collab) as Arc<dyn RegionLoader>,
        Arc::clone(collab) as Arc<dyn RegionGenerator>,
        hooks,
    )
}

/// The 3x3 block around `centre`, sorted like `primary_coords()`.
pub fn block(centre: RegionCoord) -> Vec<RegionCoord> {
    let mut coords: Vec<_> = centre.block_3x3().collect();
    coords.sort_unstable();
    coords
}
