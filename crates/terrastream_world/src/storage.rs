//! # Region Files
//!
//! One LZ4-compressed file per region, `r.<x>.<y>.bin` in the save
//! directory. Loads and saves run on the worker pool.
//!
//! ## Layout (before compression)
//!
//! ```text
//! [magic "TSRG":4][version:1][flags:1][reserved:2][x:i32][y:i32]
//! [tiles: REGION_SIZE^2 * 4 bytes, slice by slice]
//! [structure count:u32]
//!   [origin_x:i64][origin_y:i64][tile count:u32][StructureTile * count]
//! ```
//!
//! All integers little-endian. `flags` bit 0 is the generated flag. A file
//! whose declared size exceeds [`MAX_RAW_SIZE`] is rejected unread.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lz4_flex::{compress_prepend_size, decompress_size_prepended};
use terrastream::{
    Completion, PendingStructure, Region, RegionCoord, RegionLoader, RegionPayload, StoreError,
    StoreResult, StructureTile,
};

use crate::pool::WorkerPool;

/// File magic.
pub const REGION_MAGIC: [u8; 4] = *b"TSRG";

/// Current layout version.
pub const REGION_VERSION: u8 = 2;

const FLAG_GENERATED: u8 = 0b0000_0001;
const HEADER_SIZE: usize = 16;

/// Budget for the structure table of one region file.
const MAX_STRUCTURE_TABLE: usize = 16 << 20;

/// Largest decompressed size a region file may declare.
pub const MAX_RAW_SIZE: usize = HEADER_SIZE + RegionPayload::data_size() + 4 + MAX_STRUCTURE_TABLE;

/// A region file, decoded.
#[derive(Debug)]
pub struct RegionRecord {
    /// Tile data.
    pub payload: RegionPayload,
    /// Whether the region was generated when saved.
    pub generated: bool,
    /// Structures still queued when saved, oldest first.
    pub structures: Vec<PendingStructure>,
}

/// Serializes a region to its compressed file contents.
#[must_use]
pub fn encode_region(region: &Region) -> Vec<u8> {
    let coord = region.coord();
    let tiles = region.payload().to_bytes();
    let structures = region.pending_structures();

    let mut raw = Vec::with_capacity(HEADER_SIZE + tiles.len() + 4);
    raw.extend_from_slice(&REGION_MAGIC);
    raw.push(REGION_VERSION);
    raw.push(if region.lifecycle().is_generated() {
        FLAG_GENERATED
    } else {
        0
    });
    raw.extend_from_slice(&[0, 0]);
    raw.extend_from_slice(&coord.x.to_le_bytes());
    raw.extend_from_slice(&coord.y.to_le_bytes());
    raw.extend_from_slice(&tiles);

    raw.extend_from_slice(&(structures.len() as u32).to_le_bytes());
    for s in &structures {
        raw.extend_from_slice(&s.origin_x.to_le_bytes());
        raw.extend_from_slice(&s.origin_y.to_le_bytes());
        raw.extend_from_slice(&(s.tiles.len() as u32).to_le_bytes());
        raw.extend_from_slice(bytemuck::cast_slice::<StructureTile, u8>(&s.tiles));
    }

    compress_prepend_size(&raw)
}

/// Parses compressed file contents for `coord`.
///
/// # Errors
///
/// Returns [`StoreError::CorruptRegion`] if decompression or any layout
/// check fails.
pub fn decode_region(coord: RegionCoord, bytes: &[u8]) -> StoreResult<RegionRecord> {
    let corrupt = |reason: &str| StoreError::CorruptRegion {
        coord,
        reason: reason.to_string(),
    };

    let declared = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| corrupt("truncated size prefix"))?;
    if declared as usize > MAX_RAW_SIZE {
        return Err(corrupt(&format!("declared size {declared} exceeds {MAX_RAW_SIZE}")));
    }
    let raw = decompress_size_prepended(bytes).map_err(|e| corrupt(&e.to_string()))?;
    let mut r = Reader { bytes: &raw, pos: 0 };

    if r.take(4).ok_or_else(|| corrupt("truncated header"))? != REGION_MAGIC {
        return Err(corrupt("bad magic"));
    }
    let version = r.u8().ok_or_else(|| corrupt("truncated header"))?;
    if version != REGION_VERSION {
        return Err(corrupt(&format!("unsupported version {version}")));
    }
    let flags = r.u8().ok_or_else(|| corrupt("truncated header"))?;
    r.take(2).ok_or_else(|| corrupt("truncated header"))?;
    let x = r.i32().ok_or_else(|| corrupt("truncated header"))?;
    let y = r.i32().ok_or_else(|| corrupt("truncated header"))?;
    if RegionCoord::new(x, y) != coord {
        return Err(corrupt(&format!("file holds region ({x}, {y})")));
    }

    let payload = r
        .take(RegionPayload::data_size())
        .and_then(RegionPayload::from_bytes)
        .ok_or_else(|| corrupt("truncated tile data"))?;

    let count = r.u32().ok_or_else(|| corrupt("truncated structure table"))?;
    let mut structures = Vec::new();
    for _ in 0..count {
        let origin_x = r.i64().ok_or_else(|| corrupt("truncated structure"))?;
        let origin_y = r.i64().ok_or_else(|| corrupt("truncated structure"))?;
        let n = r.u32().ok_or_else(|| corrupt("truncated structure"))? as usize;
        let raw_tiles = n
            .checked_mul(std::mem::size_of::<StructureTile>())
            .and_then(|len| r.take(len))
            .ok_or_else(|| corrupt("truncated structure tiles"))?;
        let tiles = raw_tiles
            .chunks_exact(std::mem::size_of::<StructureTile>())
            .map(bytemuck::pod_read_unaligned::<StructureTile>)
            .collect();
        structures.push(PendingStructure::new(origin_x, origin_y, tiles));
    }
    if r.pos != raw.len() {
        return Err(corrupt("trailing bytes"));
    }

    Ok(RegionRecord {
        payload,
        generated: flags & FLAG_GENERATED != 0,
        structures,
    })
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let out = self.bytes.get(self.pos..end)?;
        self.pos = end;
        Some(out)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32(&mut self) -> Option<u32> {
        self.take(4)
            .and_then(|b| b.try_into().ok())
            .map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Option<i32> {
        self.take(4)
            .and_then(|b| b.try_into().ok())
            .map(i32::from_le_bytes)
    }

    fn i64(&mut self) -> Option<i64> {
        self.take(8)
            .and_then(|b| b.try_into().ok())
            .map(i64::from_le_bytes)
    }
}

/// The save directory.
#[derive(Debug)]
pub struct RegionFiles {
    dir: PathBuf,
}

impl RegionFiles {
    /// Opens (and creates if needed) a save directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// The save directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of a region.
    #[must_use]
    pub fn path_for(&self, coord: RegionCoord) -> PathBuf {
        self.dir.join(format!("r.{}.{}.bin", coord.x, coord.y))
    }

    /// Reads a region file. A missing file is `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] on read failure and
    /// [`StoreError::CorruptRegion`] if the contents do not validate.
    pub fn read(&self, coord: RegionCoord) -> StoreResult<Option<RegionRecord>> {
        match fs::read(self.path_for(coord)) {
            Ok(bytes) => decode_region(coord, &bytes).map(Some),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a region file, replacing the old one in a single rename.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the write or rename fails.
    pub fn write(&self, region: &Region) -> StoreResult<()> {
        let path = self.path_for(region.coord());
        let tmp = path.with_extension("bin.tmp");
        fs::write(&tmp, encode_region(region))?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Reads `region`'s file and applies it. Returns true if a file was found.
    ///
    /// # Errors
    ///
    /// Propagates [`read`](Self::read) errors, and
    /// [`StoreError::Lifecycle`] if the region cannot take the generated flag.
    pub fn load_into(&self, region: &Region) -> StoreResult<bool> {
        let coord = region.coord();
        let Some(record) = self.read(coord)? else {
            return Ok(false);
        };
        region.replace_payload(record.payload);
        region.restore_pending_structures(record.structures);
        if record.generated {
            region
                .lifecycle()
                .mark_generated(region.has_pending_structures())
                .map_err(|source| StoreError::Lifecycle { coord, source })?;
        }
        Ok(true)
    }
}

/// [`RegionLoader`] backed by [`RegionFiles`] and a [`WorkerPool`].
pub struct FileRegionLoader {
    files: Arc<RegionFiles>,
    pool: Arc<WorkerPool>,
}

impl FileRegionLoader {
    /// Creates a loader over `files`, running I/O on `pool`.
    #[must_use]
    pub fn new(files: Arc<RegionFiles>, pool: Arc<WorkerPool>) -> Self {
        Self { files, pool }
    }
}

impl RegionLoader for FileRegionLoader {
    fn load(&self, region: Arc<Region>, _for_simulation: bool, done: Completion) {
        let files = Arc::clone(&self.files);
        self.pool.execute(move || match files.load_into(&region) {
            Ok(found) => {
                tracing::debug!("region {}: loaded (on disk: {found})", region.coord());
                done.succeed();
            }
            Err(e) => {
                tracing::error!("region {}: load failed: {e}", region.coord());
                done.fail();
            }
        });
    }

    fn save(&self, region: Arc<Region>, is_final: bool, done: Completion) {
        let files = Arc::clone(&self.files);
        self.pool.execute(move || match files.write(&region) {
            Ok(()) => {
                tracing::debug!("region {}: saved (final: {is_final})", region.coord());
                done.succeed();
            }
            Err(e) => {
                tracing::error!("region {}: save failed: {e}", region.coord());
                done.fail();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terrastream::{Stage, Tile};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("terrastream-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn generated_region(coord: RegionCoord) -> Region {
        let region = Region::new(coord, 10);
        assert!(region.lifecycle().try_begin_load());
        region.lifecycle().mark_loaded().unwrap();
        assert!(region.lifecycle().try_begin_generate());
        region.with_payload_mut(|p| {
            p.set_tile(0, 0, Tile::new(1));
            p.set_tile(63, 63, Tile::with_meta(2, 9));
        });
        region.lifecycle().mark_generated(false).unwrap();
        region
    }

    #[test]
    fn test_region_file_roundtrip() {
        let dir = temp_dir("roundtrip");
        let files = RegionFiles::open(&dir).unwrap();
        let coord = RegionCoord::new(-3, 5);
        let region = generated_region(coord);
        let wall = StructureTile {
            dx: 1,
            dy: 2,
            tile: Tile::new(42),
        };
        region.queue_structure(PendingStructure::new(coord.tile_x(), coord.tile_y(), vec![wall]));
        files.write(&region).unwrap();
        assert!(files.path_for(coord).ends_with("r.-3.5.bin"));

        let fresh = Region::new(coord, 10);
        assert!(fresh.lifecycle().try_begin_load());
        assert!(files.load_into(&fresh).unwrap());
        assert_eq!(fresh.payload().tile(63, 63), Tile::with_meta(2, 9));
        assert_eq!(fresh.pending_structure_count(), 1);
        // Generated, but a structure is still queued: generation must implant it.
        assert!(fresh.lifecycle().is_generated());
        assert_eq!(fresh.lifecycle().stage(), Stage::Loaded);

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = temp_dir("missing");
        let files = RegionFiles::open(&dir).unwrap();
        assert!(files.read(RegionCoord::new(9, 9)).unwrap().is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_corrupt_files_are_rejected() {
        let coord = RegionCoord::new(1, 1);
        let good = encode_region(&generated_region(coord));

        assert!(matches!(
            decode_region(coord, &good[..good.len() / 2]),
            Err(StoreError::CorruptRegion { .. })
        ));
        assert!(matches!(
            decode_region(RegionCoord::new(2, 1), &good),
            Err(StoreError::CorruptRegion { .. })
        ));
        let bad_magic = compress_prepend_size(b"NOPE\x01\x00\x00\x00");
        assert!(matches!(
            decode_region(coord, &bad_magic),
            Err(StoreError::CorruptRegion { .. })
        ));
        assert!(decode_region(coord, &good).unwrap().generated);
    }

    #[test]
    fn test_oversized_size_prefix_is_rejected_unread() {
        let coord = RegionCoord::new(1, 1);
        let mut bytes = encode_region(&generated_region(coord));
        bytes[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        match decode_region(coord, &bytes) {
            Err(StoreError::CorruptRegion { reason, .. }) => {
                assert!(reason.contains("exceeds"), "reason: {reason}");
            }
            other => panic!("expected a corrupt region, got {other:?}"),
        }
        assert!(matches!(
            decode_region(coord, &[1, 2]),
            Err(StoreError::CorruptRegion { .. })
        ));
    }

    #[test]
    fn test_far_structure_origins_survive_encoding() {
        let coord = RegionCoord::new(40_000_000, -40_000_000);
        let region = generated_region(coord);
        let wall = StructureTile {
            dx: -1,
            dy: 0,
            tile: Tile::new(42),
        };
        region.queue_structure(PendingStructure::new(coord.tile_x(), coord.tile_y() + 3, vec![wall]));

        let record = decode_region(coord, &encode_region(&region)).unwrap();
        assert_eq!(record.structures.len(), 1);
        assert_eq!(record.structures[0].origin_x, coord.tile_x());
        assert_eq!(record.structures[0].origin_y, coord.tile_y() + 3);
        assert_eq!(record.structures[0].tiles, vec![wall]);
    }
}
