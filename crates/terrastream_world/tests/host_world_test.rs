//! # Host World Tests
//!
//! Runs the store with the real worker pool, region files and generator:
//! streaming a view in, walking it, persisting edits across restarts and
//! reading regions from other threads while the simulation ticks.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use terrastream::{CacheContext, RegionCoord, StoreConfig, Tile};
use terrastream_world::{terrain_tile, HostWorld, WorldConfig};

const LOAD_TIMEOUT: Duration = Duration::from_secs(20);

fn test_config(name: &str) -> WorldConfig {
    let save_dir: PathBuf =
        std::env::temp_dir().join(format!("terrastream-world-{name}-{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&save_dir);
    WorldConfig {
        worker_threads: 4,
        save_dir,
        view_radius: 1,
        seed: 1234,
        store: StoreConfig {
            lock_stripes: 32,
            unload_delay_ticks: 2,
            autosave_interval_ticks: 1_000_000,
            drain_timeout_ms: 10_000,
        },
    }
}

/// Test: a view streams in with the generator's terrain and every region is active-ready.
#[test]
fn test_view_streams_in() {
    let config = test_config("view");
    let mut world = HostWorld::open(&config).unwrap();

    world.set_view(RegionCoord::new(0, 0), 1);
    assert!(world.wait_until_loaded(LOAD_TIMEOUT));
    world.tick();

    // Radius 1 anchors a 3x3 square, which pulls in a 5x5 block.
    let store = world.store();
    assert_eq!(store.stats().primary, 25);
    assert!(store.stuck_regions().is_empty());
    for y in -1..=1 {
        for x in -1..=1 {
            assert!(store.is_active(RegionCoord::new(x, y)), "({x}, {y}) inactive");
        }
    }
    assert!(!store.is_active(RegionCoord::new(2, 2)));

    let region = store.primary_region(RegionCoord::new(1, -1)).unwrap();
    let coord = region.coord();
    assert_eq!(
        region.payload().tile(5, 6),
        terrain_tile(config.seed, coord.tile_x() + 5, coord.tile_y() + 6)
    );

    let report = world.shutdown();
    assert!(report.is_clean(), "unsettled: {:?}", report.unsettled);
    assert!(config.save_dir.join("r.0.0.bin").exists());
    assert!(config.save_dir.join("r.-2.2.bin").exists());
    let _ = std::fs::remove_dir_all(&config.save_dir);
}

/// Test: edits survive eviction and a restart of the world.
#[test]
fn test_edits_persist_across_restart() {
    let config = test_config("persist");
    let marker = Tile::with_meta(500, 3);
    let edited = RegionCoord::new(0, 0);

    {
        let mut world = HostWorld::open(&config).unwrap();
        world.set_view(edited, 0);
        assert!(world.wait_until_loaded(LOAD_TIMEOUT));
        world
            .store()
            .primary_region(edited)
            .unwrap()
            .with_payload_mut(|p| p.set_tile(31, 17, marker));
        assert!(world.shutdown().is_clean());
    }

    let mut world = HostWorld::open(&config).unwrap();
    world.set_view(edited, 0);
    assert!(world.wait_until_loaded(LOAD_TIMEOUT));
    let region = world.store().primary_region(edited).unwrap();
    assert_eq!(region.payload().tile(31, 17), marker);
    assert!(region.lifecycle().is_generated());
    assert!(world.shutdown().is_clean());
    let _ = std::fs::remove_dir_all(&config.save_dir);
}

/// Test: moving the view evicts what fell behind and writes it to disk.
#[test]
fn test_walking_view_evicts_behind() {
    let config = test_config("walk");
    let mut world = HostWorld::open(&config).unwrap();

    world.set_view(RegionCoord::new(0, 0), 0);
    assert!(world.wait_until_loaded(LOAD_TIMEOUT));
    world.tick();

    world.set_view(RegionCoord::new(10, 0), 0);
    assert!(world.wait_until_loaded(LOAD_TIMEOUT));
    for _ in 0..=config.store.unload_delay_ticks {
        world.tick();
    }

    let store = world.store();
    let mut expected: Vec<_> = RegionCoord::new(10, 0).block_3x3().collect();
    expected.sort_unstable();
    assert_eq!(store.primary_coords(), expected);
    assert!(!store.is_primary(RegionCoord::new(0, 0)));
    assert!(store.wait_for_saves(LOAD_TIMEOUT).is_clean());
    assert!(world.files().path_for(RegionCoord::new(-1, -1)).exists());

    assert!(world.shutdown().is_clean());
    let _ = std::fs::remove_dir_all(&config.save_dir);
}

/// Test: reader threads cache regions while the simulation walks.
#[test]
fn test_concurrent_readers_during_walk() {
    let config = test_config("readers");
    let mut world = HostWorld::open(&config).unwrap();
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..4u64)
        .map(|seed| {
            let store = world.store().clone();
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let mut reads = 0u64;
                while !stop.load(Ordering::Relaxed) {
                    let mut ctx = CacheContext::new();
                    let coord = RegionCoord::new(rng.gen_range(-2..=8), rng.gen_range(-2..=2));
                    let region = store.cache(&mut ctx, coord);
                    assert_eq!(region.coord(), coord);
                    if region.lifecycle().is_prepared() {
                        let _ = region.payload().tile(0, 0);
                    }
                    store.uncache_all(&mut ctx);
                    reads += 1;
                }
                reads
            })
        })
        .collect();

    for x in 0..6 {
        world.set_view(RegionCoord::new(x, 0), 1);
        assert!(world.wait_until_loaded(LOAD_TIMEOUT));
        for _ in 0..3 {
            world.tick();
        }
    }

    stop.store(true, Ordering::Relaxed);
    let reads: u64 = readers.into_iter().map(|h| h.join().unwrap()).sum();
    assert!(reads > 0);
    assert!(world.store().stuck_regions().is_empty());

    let store = world.store().clone();
    let report = world.shutdown();
    assert!(report.is_clean(), "unsettled: {:?}", report.unsettled);
    let stats = store.stats();
    assert_eq!(stats.primary, 0);
    assert_eq!(stats.saves_in_flight, 0);
    let _ = std::fs::remove_dir_all(&config.save_dir);
}
