//! # Region Coordinates
//!
//! The world is an unbounded 2D plane partitioned into fixed-size square
//! regions. A `RegionCoord` names one of them and is the key of every map
//! in the store.
//!
//! ## Neighbourhood
//!
//! Regions are 8-connected: the 3x3 block around a coordinate is the
//! coordinate itself plus its eight neighbours.
//!
//! ```text
//!   (-1,-1) ( 0,-1) ( 1,-1)
//!   (-1, 0) [ 0, 0] ( 1, 0)
//!   (-1, 1) ( 0, 1) ( 1, 1)
//! ```

use std::fmt;

use crate::region::REGION_SIZE;

/// Offsets of the eight neighbours, row-major, centre excluded.
const NEIGHBOUR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

/// Region coordinate (identifies a region in the world grid).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    /// X coordinate (in regions, not tiles).
    pub x: i32,
    /// Y coordinate (in regions, not tiles).
    pub y: i32,
}

impl RegionCoord {
    /// Creates a new region coordinate.
    #[inline]
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Converts world tile coordinates to the region containing them.
    ///
    /// Tile positions beyond the outermost regions saturate to them.
    #[inline]
    #[must_use]
    pub fn from_tile_pos(tile_x: i64, tile_y: i64) -> Self {
        Self {
            x: saturate(tile_x.div_euclid(REGION_SIZE as i64)),
            y: saturate(tile_y.div_euclid(REGION_SIZE as i64)),
        }
    }

    /// Returns the world tile X of the region's origin (corner).
    ///
    /// Tile space is 64-bit: every region's origin is representable.
    #[inline]
    #[must_use]
    pub fn tile_x(self) -> i64 {
        i64::from(self.x) * REGION_SIZE as i64
    }

    /// Returns the world tile Y of the region's origin.
    #[inline]
    #[must_use]
    pub fn tile_y(self) -> i64 {
        i64::from(self.y) * REGION_SIZE as i64
    }

    /// Returns the coordinate shifted by `(dx, dy)` regions.
    #[inline]
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.wrapping_add(dx),
            y: self.y.wrapping_add(dy),
        }
    }

    /// Returns the eight 8-connected neighbours.
    #[must_use]
    pub fn neighbours(self) -> [Self; 8] {
        NEIGHBOUR_OFFSETS.map(|(dx, dy)| self.offset(dx, dy))
    }

    /// Iterates the 3x3 block centred on this coordinate, centre included.
    pub fn block_3x3(self) -> impl Iterator<Item = Self> {
        (-1..=1).flat_map(move |dy| (-1..=1).map(move |dx| self.offset(dx, dy)))
    }

    /// Returns true if `other` is one of the eight neighbours.
    #[inline]
    #[must_use]
    pub fn is_neighbour(self, other: Self) -> bool {
        self != other
            && (i64::from(self.x) - i64::from(other.x)).abs() <= 1
            && (i64::from(self.y) - i64::from(other.y)).abs() <= 1
    }

    /// Chebyshev distance in regions.
    #[inline]
    #[must_use]
    pub fn chebyshev(self, other: Self) -> u32 {
        let dx = (i64::from(self.x) - i64::from(other.x)).unsigned_abs();
        let dy = (i64::from(self.y) - i64::from(other.y)).unsigned_abs();
        dx.max(dy).min(u64::from(u32::MAX)) as u32
    }

    /// Spreads the coordinate over a 64-bit value for lock striping.
    ///
    /// Adjacent coordinates land on different stripes with high probability.
    #[inline]
    #[must_use]
    pub const fn stripe_hash(self) -> u64 {
        let x = self.x as u32 as u64;
        let y = self.y as u32 as u64;
        let mut h = x.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ y.wrapping_mul(0xC2B2_AE3D_27D4_EB4F);
        h ^= h >> 29;
        h = h.wrapping_mul(0xBF58_476D_1CE4_E5B9);
        h ^ (h >> 32)
    }
}

fn saturate(region: i64) -> i32 {
    i32::try_from(region).unwrap_or(if region < 0 { i32::MIN } else { i32::MAX })
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}
