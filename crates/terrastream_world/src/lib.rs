//! # TERRASTREAM World
//!
//! A host world for the `terrastream` region store: a worker pool, a
//! file-backed loader, a deterministic generator and the simulation-side
//! driver that ties them together.
//!
//! ## Example
//!
//! ```rust,ignore
//! use terrastream_world::{HostWorld, WorldConfig};
//!
//! let mut world = HostWorld::open(&WorldConfig::default())?;
//! world.set_view(RegionCoord::new(0, 0), 2);
//! world.wait_until_loaded(Duration::from_secs(5));
//! loop {
//!     world.tick();
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod config;
pub mod generator;
pub mod pool;
pub mod storage;
pub mod world;

pub use config::WorldConfig;
pub use generator::{generate_region, terrain_tile, FlatGenerator, GRASS, STONE};
pub use pool::WorkerPool;
pub use storage::{decode_region, encode_region, FileRegionLoader, RegionFiles, RegionRecord};
pub use world::HostWorld;
