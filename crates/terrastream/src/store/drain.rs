//! Tracking of in-flight saves for the shutdown drain.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::coord::RegionCoord;

/// Outcome of waiting for outstanding saves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Regions whose saves were still running when the budget ran out.
    pub unsettled: Vec<RegionCoord>,
    /// Time spent waiting.
    pub waited: Duration,
}

impl DrainReport {
    /// True if every save settled in time.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.unsettled.is_empty()
    }
}

/// Regions with a save chain running (from the first dispatch until
/// `finish_save` reports idle).
#[derive(Default)]
pub(crate) struct SaveTracker {
    saving: Mutex<HashMap<RegionCoord, u32>>,
    settled: Condvar,
}

impl SaveTracker {
    pub(crate) fn begin(&self, coord: RegionCoord) {
        *self.saving.lock().entry(coord).or_insert(0) += 1;
    }

    pub(crate) fn end(&self, coord: RegionCoord) {
        let mut saving = self.saving.lock();
        if let Some(n) = saving.get_mut(&coord) {
            *n -= 1;
            if *n == 0 {
                saving.remove(&coord);
            }
        }
        if saving.is_empty() {
            self.settled.notify_all();
        }
    }

    pub(crate) fn in_flight(&self) -> usize {
        self.saving.lock().values().map(|&n| n as usize).sum()
    }

    /// Blocks until no save is running or `timeout` elapses.
    pub(crate) fn wait(&self, timeout: Duration) -> DrainReport {
        let start = Instant::now();
        let deadline = start + timeout;
        let mut saving = self.saving.lock();
        while !saving.is_empty() {
            if self.settled.wait_until(&mut saving, deadline).timed_out() {
                break;
            }
        }
        let mut unsettled: Vec<_> = saving.keys().copied().collect();
        unsettled.sort_unstable();
        DrainReport {
            unsettled,
            waited: start.elapsed(),
        }
    }
}
