//! # Host World
//!
//! The simulation-side owner of a [`RegionStore`]. Holds the simulation
//! token, keeps a square view of regions anchored, and ticks the store.
//!
//! ```text
//!   set_view(c, r) ──> anchor   (square around c) \ (old square)
//!                 └──> deanchor (old square) \ (square around c)
//!   tick()        ──> RegionStore::update
//!   shutdown()    ──> RegionStore::shutdown, then the worker pool closes
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use terrastream::{
    DrainReport, NoHooks, RegionCoord, RegionStore, SimulationThread, StoreResult, TickReport,
    WorldHooks,
};

use crate::config::WorldConfig;
use crate::generator::FlatGenerator;
use crate::pool::WorkerPool;
use crate::storage::{FileRegionLoader, RegionFiles};

/// The host world driving a region store from the simulation thread.
pub struct HostWorld {
    store: RegionStore,
    sim: SimulationThread,
    pool: Arc<WorkerPool>,
    files: Arc<RegionFiles>,
    view: HashSet<RegionCoord>,
    center: Option<RegionCoord>,
}

impl HostWorld {
    /// Opens a world with no hooks.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`](terrastream::StoreError::Io) if the save
    /// directory or the worker threads cannot be created.
    pub fn open(config: &WorldConfig) -> StoreResult<Self> {
        Self::with_hooks(config, Arc::new(NoHooks))
    }

    /// Opens a world whose store calls `hooks`.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub fn with_hooks(config: &WorldConfig, hooks: Arc<dyn WorldHooks>) -> StoreResult<Self> {
        let files = Arc::new(RegionFiles::open(&config.save_dir)?);
        let pool = Arc::new(WorkerPool::new(config.worker_threads)?);
        let loader = FileRegionLoader::new(Arc::clone(&files), Arc::clone(&pool));
        let generator = FlatGenerator::new(config.seed, Arc::clone(&pool));
        let store = RegionStore::new(
            config.store.clone(),
            Arc::new(loader),
            Arc::new(generator),
            hooks,
        );
        let sim = store.claim_simulation()?;
        tracing::info!(
            "world opened at {} with {} workers",
            files.dir().display(),
            pool.threads()
        );
        Ok(Self {
            store,
            sim,
            pool,
            files,
            view: HashSet::new(),
            center: None,
        })
    }

    /// The store. Clones may be handed to other threads for `cache` access.
    #[must_use]
    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    /// The save directory.
    #[must_use]
    pub fn files(&self) -> &RegionFiles {
        &self.files
    }

    /// The current view centre, if a view was set.
    #[must_use]
    pub fn center(&self) -> Option<RegionCoord> {
        self.center
    }

    /// Anchors the `(2r+1)^2` square around `center` and de-anchors the
    /// regions of the previous view that fell outside it.
    pub fn set_view(&mut self, center: RegionCoord, radius: u32) {
        let r = i32::try_from(radius).unwrap_or(i32::MAX);
        let next: HashSet<RegionCoord> = (-r..=r)
            .flat_map(|dy| (-r..=r).map(move |dx| center.offset(dx, dy)))
            .collect();

        for &coord in next.difference(&self.view) {
            self.store.anchor_region(&self.sim, coord);
        }
        for &coord in self.view.difference(&next) {
            self.store.deanchor_region(&self.sim, coord);
        }
        self.view = next;
        self.center = Some(center);
    }

    /// Runs one simulation tick.
    pub fn tick(&mut self) -> TickReport {
        self.store.update(&self.sim)
    }

    /// Requests a save of every primary region.
    pub fn save_all(&self) {
        self.store.save_all(&self.sim);
    }

    /// Waits until every requested region is in primary storage.
    /// Returns false if `timeout` elapsed first.
    pub fn wait_until_loaded(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.store.is_loaded() {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Evicts everything with final saves, waits for them within the store's
    /// drain budget, then stops the workers.
    pub fn shutdown(self) -> DrainReport {
        let report = self.store.shutdown(&self.sim);
        self.pool.close();
        tracing::info!(
            "world closed: {} jobs run, {} saves unsettled",
            self.pool.executed(),
            report.unsettled.len()
        );
        report
    }
}
