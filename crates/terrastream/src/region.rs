//! # Regions
//!
//! A region is a fixed-size square of the world: a grid of slices holding
//! tiles, a queue of structures waiting to be implanted, and its
//! lifecycle state.
//!
//! ## Layout
//!
//! Regions are 64x64 tiles, split into 4x4 slices of 16x16 tiles. Each
//! tile is a `u16` id plus `u16` metadata.
//!
//! ## Ownership
//!
//! Regions are shared (`Arc<Region>`) between primary storage, cache
//! storage and any thread that cached them. The payload lock only guards
//! the tile data; which thread may mutate it is decided by the lifecycle
//! stage (one pipeline worker mid-pipeline, the simulation thread once in
//! primary storage).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::coord::RegionCoord;
use crate::lifecycle::RegionLifecycleState;

/// Slice width/height in tiles.
pub const SLICE_SIZE: usize = 16;

/// Tiles per slice.
pub const SLICE_AREA: usize = SLICE_SIZE * SLICE_SIZE;

/// Slices per region side.
pub const REGION_SLICES: usize = 4;

/// Region width/height in tiles.
pub const REGION_SIZE: usize = SLICE_SIZE * REGION_SLICES;

/// Tiles per region.
pub const TILES_PER_REGION: usize = REGION_SIZE * REGION_SIZE;

/// A single tile.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
#[repr(C)]
pub struct Tile {
    /// Tile type ID.
    pub id: u16,
    /// Tile metadata (light, orientation, growth stage...).
    pub meta: u16,
}

impl Tile {
    /// Empty tile.
    pub const EMPTY: Self = Self { id: 0, meta: 0 };

    /// Creates a tile with the given ID.
    #[inline]
    #[must_use]
    pub const fn new(id: u16) -> Self {
        Self { id, meta: 0 }
    }

    /// Creates a tile with ID and metadata.
    #[inline]
    #[must_use]
    pub const fn with_meta(id: u16, meta: u16) -> Self {
        Self { id, meta }
    }

    /// Returns true for the empty tile id.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.id == 0
    }
}

/// A 16x16 sub-partition of a region.
#[derive(Clone, PartialEq, Eq)]
pub struct Slice {
    /// Tiles indexed as `[y * SLICE_SIZE + x]`.
    tiles: Box<[Tile; SLICE_AREA]>,
}

impl Slice {
    fn new() -> Self {
        Self {
            tiles: Box::new([Tile::EMPTY; SLICE_AREA]),
        }
    }

    /// Tiles of this slice, row-major.
    #[inline]
    #[must_use]
    pub fn tiles(&self) -> &[Tile; SLICE_AREA] {
        &self.tiles
    }

    /// Returns true if every tile is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tiles.iter().all(|t| t.is_empty())
    }
}

/// The tile data of a region.
#[derive(Clone, PartialEq, Eq)]
pub struct RegionPayload {
    /// Slices indexed as `[sy * REGION_SLICES + sx]`.
    slices: Vec<Slice>,
}

impl Default for RegionPayload {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RegionPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled = self.slices.iter().filter(|s| !s.is_empty()).count();
        f.debug_struct("RegionPayload")
            .field("slices", &self.slices.len())
            .field("non_empty", &filled)
            .finish()
    }
}

impl RegionPayload {
    /// Creates an all-empty payload.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slices: (0..REGION_SLICES * REGION_SLICES).map(|_| Slice::new()).collect(),
        }
    }

    #[inline]
    const fn index(x: usize, y: usize) -> (usize, usize) {
        let slice = (y / SLICE_SIZE) * REGION_SLICES + x / SLICE_SIZE;
        let tile = (y % SLICE_SIZE) * SLICE_SIZE + x % SLICE_SIZE;
        (slice, tile)
    }

    /// Gets a tile at local coordinates. Out of range reads are empty.
    #[inline]
    #[must_use]
    pub fn tile(&self, x: usize, y: usize) -> Tile {
        if x < REGION_SIZE && y < REGION_SIZE {
            let (s, t) = Self::index(x, y);
            self.slices[s].tiles[t]
        } else {
            Tile::EMPTY
        }
    }

    /// Sets a tile at local coordinates. Out of range writes are ignored.
    #[inline]
    pub fn set_tile(&mut self, x: usize, y: usize, tile: Tile) {
        if x < REGION_SIZE && y < REGION_SIZE {
            let (s, t) = Self::index(x, y);
            self.slices[s].tiles[t] = tile;
        }
    }

    /// Gets a slice by slice coordinates.
    #[must_use]
    pub fn slice(&self, sx: usize, sy: usize) -> Option<&Slice> {
        if sx < REGION_SLICES && sy < REGION_SLICES {
            self.slices.get(sy * REGION_SLICES + sx)
        } else {
            None
        }
    }

    /// Iterates the slices in storage order.
    pub fn slices(&self) -> impl Iterator<Item = &Slice> {
        self.slices.iter()
    }

    /// Serializes the tiles, slice by slice.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::data_size());
        for slice in &self.slices {
            bytes.extend_from_slice(bytemuck::cast_slice::<Tile, u8>(&slice.tiles[..]));
        }
        bytes
    }

    /// Rebuilds a payload from [`to_bytes`](Self::to_bytes) output.
    ///
    /// Returns `None` if the length does not match.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::data_size() {
            return None;
        }
        let mut payload = Self::new();
        let tile_size = std::mem::size_of::<Tile>();
        for (slice, chunk) in payload
            .slices
            .iter_mut()
            .zip(bytes.chunks_exact(SLICE_AREA * tile_size))
        {
            for (tile, raw) in slice.tiles.iter_mut().zip(chunk.chunks_exact(tile_size)) {
                *tile = bytemuck::pod_read_unaligned(raw);
            }
        }
        Some(payload)
    }

    /// Raw tile data size in bytes.
    #[must_use]
    pub const fn data_size() -> usize {
        TILES_PER_REGION * std::mem::size_of::<Tile>()
    }
}

/// One tile of a structure, relative to the structure origin.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
#[repr(C)]
pub struct StructureTile {
    /// X offset from the origin.
    pub dx: i16,
    /// Y offset from the origin.
    pub dy: i16,
    /// Tile to place.
    pub tile: Tile,
}

/// A structure (or the part of one) waiting to be implanted in a region.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PendingStructure {
    /// World tile X of the structure origin.
    pub origin_x: i64,
    /// World tile Y of the structure origin.
    pub origin_y: i64,
    /// Tiles to place.
    pub tiles: Vec<StructureTile>,
}

impl PendingStructure {
    /// Creates a structure at a world tile origin.
    #[must_use]
    pub const fn new(origin_x: i64, origin_y: i64, tiles: Vec<StructureTile>) -> Self {
        Self {
            origin_x,
            origin_y,
            tiles,
        }
    }

    /// World tile position of one structure tile.
    #[inline]
    #[must_use]
    pub fn world_pos(&self, t: &StructureTile) -> (i64, i64) {
        (
            self.origin_x.saturating_add(i64::from(t.dx)),
            self.origin_y.saturating_add(i64::from(t.dy)),
        )
    }

    /// Writes the tiles that fall inside `coord` into `payload`.
    ///
    /// Returns the number of tiles written.
    pub fn implant(&self, coord: RegionCoord, payload: &mut RegionPayload) -> usize {
        let mut written = 0;
        for t in &self.tiles {
            let (wx, wy) = self.world_pos(t);
            let local = |w: i64, origin: i64| {
                w.checked_sub(origin)
                    .and_then(|d| usize::try_from(d).ok())
                    .filter(|&d| d < REGION_SIZE)
            };
            let (Some(lx), Some(ly)) = (local(wx, coord.tile_x()), local(wy, coord.tile_y())) else {
                continue;
            };
            payload.set_tile(lx, ly, t.tile);
            written += 1;
        }
        written
    }
}

/// A region of the world.
pub struct Region {
    coord: RegionCoord,
    payload: RwLock<RegionPayload>,
    structures: Mutex<VecDeque<PendingStructure>>,
    last_saved_age: AtomicU64,
    dirty: AtomicBool,
    lifecycle: RegionLifecycleState,
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("coord", &self.coord)
            .field("lifecycle", &self.lifecycle.snapshot())
            .field("dirty", &self.is_dirty())
            .finish_non_exhaustive()
    }
}

impl Region {
    /// Creates an empty region in stage `New`.
    #[must_use]
    pub fn new(coord: RegionCoord, unload_delay_ticks: u32) -> Self {
        Self {
            coord,
            payload: RwLock::new(RegionPayload::new()),
            structures: Mutex::new(VecDeque::new()),
            last_saved_age: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            lifecycle: RegionLifecycleState::new(unload_delay_ticks),
        }
    }

    /// The region's coordinate.
    #[inline]
    #[must_use]
    pub const fn coord(&self) -> RegionCoord {
        self.coord
    }

    /// The region's lifecycle state.
    #[inline]
    #[must_use]
    pub const fn lifecycle(&self) -> &RegionLifecycleState {
        &self.lifecycle
    }

    /// Shared read access to the tiles.
    pub fn payload(&self) -> RwLockReadGuard<'_, RegionPayload> {
        self.payload.read()
    }

    /// Mutates the tiles and marks the region dirty.
    pub fn with_payload_mut<R>(&self, f: impl FnOnce(&mut RegionPayload) -> R) -> R {
        let result = f(&mut self.payload.write());
        self.mark_dirty();
        result
    }

    /// Replaces the tiles with freshly loaded ones. Does not dirty the region.
    pub fn replace_payload(&self, payload: RegionPayload) {
        *self.payload.write() = payload;
    }

    // ------------------------------------------------------------------
    // Pending structures
    // ------------------------------------------------------------------

    /// Queues a structure. Callable from any thread.
    pub fn queue_structure(&self, structure: PendingStructure) {
        self.structures.lock().push_back(structure);
        self.mark_dirty();
    }

    /// Returns true if structures are waiting to be implanted.
    #[must_use]
    pub fn has_pending_structures(&self) -> bool {
        !self.structures.lock().is_empty()
    }

    /// Number of structures waiting to be implanted.
    #[must_use]
    pub fn pending_structure_count(&self) -> usize {
        self.structures.lock().len()
    }

    /// Copies the queue without draining it (for persistence).
    #[must_use]
    pub fn pending_structures(&self) -> Vec<PendingStructure> {
        self.structures.lock().iter().cloned().collect()
    }

    /// Re-queues structures read back from storage, ahead of newer ones.
    pub fn restore_pending_structures(&self, restored: Vec<PendingStructure>) {
        let mut queue = self.structures.lock();
        for s in restored.into_iter().rev() {
            queue.push_front(s);
        }
    }

    /// Drains the queue and implants every structure. Only the thread that
    /// currently owns the payload may call this.
    ///
    /// Returns the number of structures implanted.
    pub fn implant_pending_structures(&self) -> usize {
        let drained: Vec<PendingStructure> = self.structures.lock().drain(..).collect();
        if drained.is_empty() {
            return 0;
        }
        let mut payload = self.payload.write();
        for s in &drained {
            s.implant(self.coord, &mut payload);
        }
        drop(payload);
        self.mark_dirty();
        drained.len()
    }

    // ------------------------------------------------------------------
    // Persistence bookkeeping
    // ------------------------------------------------------------------

    /// Whether the region changed since its last save was dispatched.
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Marks the region as needing a save.
    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clears the dirty flag, returning its previous value.
    #[inline]
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    /// Simulation age of the last save. Never decreases.
    #[inline]
    #[must_use]
    pub fn last_saved_age(&self) -> u64 {
        self.last_saved_age.load(Ordering::Relaxed)
    }

    /// Records a save at `age`.
    #[inline]
    pub fn record_save(&self, age: u64) {
        self.last_saved_age.fetch_max(age, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_at(x: i64, y: i64) -> PendingStructure {
        let tiles = (-2..=2)
            .map(|d| StructureTile {
                dx: d,
                dy: 0,
                tile: Tile::new(4),
            })
            .collect();
        PendingStructure::new(x, y, tiles)
    }

    #[test]
    fn test_payload_tile_roundtrip_through_slices() {
        let mut payload = RegionPayload::new();
        payload.set_tile(0, 0, Tile::new(1));
        payload.set_tile(17, 33, Tile::with_meta(2, 9));
        payload.set_tile(REGION_SIZE - 1, REGION_SIZE - 1, Tile::new(3));
        payload.set_tile(REGION_SIZE, 0, Tile::new(99));

        assert_eq!(payload.tile(17, 33), Tile::with_meta(2, 9));
        assert_eq!(payload.tile(REGION_SIZE, 0), Tile::EMPTY);
        assert!(!payload.slice(1, 2).unwrap().is_empty());
        assert!(payload.slice(2, 2).unwrap().is_empty());
        assert!(payload.slice(REGION_SLICES, 0).is_none());

        let restored = RegionPayload::from_bytes(&payload.to_bytes()).unwrap();
        assert_eq!(restored, payload);
        assert!(RegionPayload::from_bytes(&[0u8; 7]).is_none());
    }

    #[test]
    fn test_structure_implant_only_touches_own_region() {
        let coord = RegionCoord::new(0, 0);
        let mut payload = RegionPayload::new();
        // Straddles the border with region (1, 0).
        let s = tree_at(REGION_SIZE as i64 - 1, 5);
        assert_eq!(s.implant(coord, &mut payload), 3);
        assert_eq!(payload.tile(REGION_SIZE - 1, 5), Tile::new(4));
        assert_eq!(payload.tile(REGION_SIZE - 3, 5), Tile::new(4));

        let mut east = RegionPayload::new();
        assert_eq!(s.implant(RegionCoord::new(1, 0), &mut east), 2);
        assert_eq!(east.tile(1, 5), Tile::new(4));
    }

    #[test]
    fn test_structure_implant_at_far_region() {
        let coord = RegionCoord::new(40_000_000, -40_000_000);
        let mut payload = RegionPayload::new();
        let s = tree_at(coord.tile_x() + 1, coord.tile_y() + 7);
        // dx = -2 lands in the western neighbour.
        assert_eq!(s.implant(coord, &mut payload), 4);
        assert_eq!(payload.tile(0, 7), Tile::new(4));
        assert_eq!(payload.tile(3, 7), Tile::new(4));

        let mut west = RegionPayload::new();
        assert_eq!(s.implant(coord.offset(-1, 0), &mut west), 1);
        assert_eq!(west.tile(REGION_SIZE - 1, 7), Tile::new(4));
    }

    #[test]
    fn test_implant_drains_queue_once() {
        let region = Region::new(RegionCoord::new(0, 0), 10);
        region.queue_structure(tree_at(10, 10));
        region.queue_structure(tree_at(30, 30));
        assert!(region.take_dirty());
        assert_eq!(region.pending_structure_count(), 2);
        assert_eq!(region.implant_pending_structures(), 2);
        assert_eq!(region.implant_pending_structures(), 0);
        assert!(!region.has_pending_structures());
        assert!(region.is_dirty());
        assert_eq!(region.payload().tile(10, 10), Tile::new(4));
    }

    #[test]
    fn test_restore_keeps_order() {
        let region = Region::new(RegionCoord::new(0, 0), 10);
        region.queue_structure(tree_at(3, 3));
        region.restore_pending_structures(vec![tree_at(1, 1), tree_at(2, 2)]);
        let origins: Vec<_> = region
            .pending_structures()
            .iter()
            .map(|s| s.origin_x)
            .collect();
        assert_eq!(origins, vec![1, 2, 3]);
    }

    #[test]
    fn test_dirty_and_save_age() {
        let region = Region::new(RegionCoord::new(2, 2), 10);
        assert!(!region.is_dirty());
        region.replace_payload(RegionPayload::new());
        assert!(!region.is_dirty());
        region.with_payload_mut(|p| p.set_tile(1, 1, Tile::new(7)));
        assert!(region.take_dirty());
        assert!(!region.take_dirty());

        region.record_save(50);
        region.record_save(20);
        assert_eq!(region.last_saved_age(), 50);
    }
}
