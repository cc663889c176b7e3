//! Deterministic flat-world generation on the worker pool.

use std::sync::Arc;

use terrastream::{Completion, Region, RegionGenerator, Tile, REGION_SIZE};

use crate::pool::WorkerPool;

/// Ground tile.
pub const GRASS: Tile = Tile::new(1);

/// Scattered rock tile.
pub const STONE: Tile = Tile::new(2);

/// Tile at a world position for a seed. Same inputs, same tile.
#[must_use]
pub fn terrain_tile(seed: u64, world_x: i64, world_y: i64) -> Tile {
    let mut h = seed
        ^ (world_x as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (world_y as u64).rotate_left(32);
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^= h >> 31;
    let base = if h % 16 == 0 { STONE } else { GRASS };
    Tile::with_meta(base.id, ((h >> 8) & 0xF) as u16)
}

/// Fills an ungenerated region with terrain, then implants its queued
/// structures. A region already generated on disk only gets the implant.
pub fn generate_region(seed: u64, region: &Region) {
    if !region.lifecycle().is_generated() {
        let coord = region.coord();
        region.with_payload_mut(|payload| {
            for y in 0..REGION_SIZE {
                for x in 0..REGION_SIZE {
                    let wx = coord.tile_x() + x as i64;
                    let wy = coord.tile_y() + y as i64;
                    payload.set_tile(x, y, terrain_tile(seed, wx, wy));
                }
            }
        });
    }
    let implanted = region.implant_pending_structures();
    if implanted > 0 {
        tracing::debug!("region {}: implanted {implanted} structures", region.coord());
    }
}

/// [`RegionGenerator`] running [`generate_region`] on a [`WorkerPool`].
pub struct FlatGenerator {
    seed: u64,
    pool: Arc<WorkerPool>,
}

impl FlatGenerator {
    /// Creates a generator for `seed`.
    #[must_use]
    pub fn new(seed: u64, pool: Arc<WorkerPool>) -> Self {
        Self { seed, pool }
    }

    /// The world seed.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }
}

impl RegionGenerator for FlatGenerator {
    fn generate(&self, region: Arc<Region>, done: Completion) {
        let seed = self.seed;
        self.pool.execute(move || {
            generate_region(seed, &region);
            done.succeed();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream::{PendingStructure, RegionCoord, StructureTile};

    #[test]
    fn test_terrain_is_deterministic() {
        for (x, y) in [(0, 0), (-1, 5), (1000, -1000), (i64::MIN, i64::MAX)] {
            assert_eq!(terrain_tile(42, x, y), terrain_tile(42, x, y));
        }
        let differs = (0..256).any(|x| terrain_tile(1, x, 0) != terrain_tile(2, x, 0));
        assert!(differs);
    }

    #[test]
    fn test_terrain_mixes_grass_and_stone() {
        let stone = (0..64)
            .flat_map(|y| (0..64).map(move |x| (x, y)))
            .filter(|&(x, y)| terrain_tile(7, x, y).id == STONE.id)
            .count();
        assert!(stone > 0 && stone < 64 * 64 / 4, "stone count {stone}");
    }

    #[test]
    fn test_generate_fills_and_implants() {
        let coord = RegionCoord::new(2, -1);
        let region = Region::new(coord, 10);
        let tower = Tile::new(99);
        region.queue_structure(PendingStructure::new(
            coord.tile_x() + 10,
            coord.tile_y() + 20,
            vec![StructureTile { dx: 0, dy: 0, tile: tower }],
        ));

        generate_region(3, &region);
        assert_eq!(region.payload().tile(10, 20), tower);
        assert_eq!(
            region.payload().tile(0, 0),
            terrain_tile(3, coord.tile_x(), coord.tile_y())
        );
        assert!(!region.has_pending_structures());
        assert!(region.is_dirty());
    }

    #[test]
    fn test_generate_far_region() {
        let coord = RegionCoord::new(40_000_000, -40_000_000);
        let region = Region::new(coord, 10);
        generate_region(1, &region);

        let last = REGION_SIZE - 1;
        let payload = region.payload();
        assert_eq!(payload.tile(0, 0), terrain_tile(1, coord.tile_x(), coord.tile_y()));
        assert_eq!(
            payload.tile(last, last),
            terrain_tile(1, coord.tile_x() + last as i64, coord.tile_y() + last as i64)
        );
        // Neighbouring regions do not repeat each other's terrain.
        let east = RegionCoord::new(40_000_001, -40_000_000);
        let shifted = (0..REGION_SIZE)
            .any(|x| payload.tile(x, 0) != terrain_tile(1, east.tile_x() + x as i64, east.tile_y()));
        assert!(shifted);
    }
}
