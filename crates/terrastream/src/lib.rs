//! # TERRASTREAM
//!
//! Concurrent region streaming for a tile world too large to keep in memory.
//!
//! ## Design Principles
//!
//! 1. **The simulation thread never waits on I/O** - loading, generation and
//!    saving run on collaborator workers and report back through a [`Completion`]
//! 2. **No global lock** - one striped mutex per coordinate hash, never held
//!    across a collaborator call
//! 3. **A region is never simulated before `Prepared`** and never dropped while
//!    a save is running
//! 4. **Ref-counted caching** - any thread may borrow a region of any stage
//!    through its own [`CacheContext`]
//!
//! ## Storage
//!
//! ```text
//!            anchor_region                    cache(ctx, coord)
//!                 │                                  │
//!                 ▼                                  ▼
//!   ┌──────────────────────────┐  promote  ┌──────────────────────────┐
//!   │   PRIMARY (simulated)    │ ◄──────── │   CACHE (marks, stage)   │
//!   │   Prepared regions only  │ ────────► │   any stage, ref-counted │
//!   └──────────────────────────┘   evict   └──────────────────────────┘
//!                                              │ load / generate / save
//!                                              ▼
//!                                   RegionLoader / RegionGenerator
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use terrastream::{RegionCoord, RegionStore, StoreConfig, NoHooks};
//!
//! let store = RegionStore::new(StoreConfig::default(), loader, generator, Arc::new(NoHooks));
//! let sim = store.claim_simulation()?;
//!
//! store.anchor_region(&sim, RegionCoord::new(0, 0));
//! while !store.is_loaded() {
//!     store.update(&sim);
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod coord;
pub mod error;
pub mod io;
pub mod lifecycle;
pub mod region;
pub mod store;

pub use config::StoreConfig;
pub use coord::RegionCoord;
pub use error::{LifecycleError, StoreError, StoreResult};
pub use io::{NoHooks, RegionGenerator, RegionLoader, WorldHooks};
pub use lifecycle::{
    LifecycleSnapshot, RegionLifecycleState, SaveStage, SimulationThread, Stage, NEIGHBOUR_COUNT,
};
pub use region::{
    PendingStructure, Region, RegionPayload, Slice, StructureTile, Tile, REGION_SIZE,
    REGION_SLICES, SLICE_SIZE, TILES_PER_REGION,
};
pub use store::{CacheContext, Completion, DrainReport, RegionStore, Step, StoreStats, TickReport};
