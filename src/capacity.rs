//! Capacity-aware sizing of test files.
//!
//! Free space is volatile: [`CapacityPlanner::can_write`] asks the probe
//! again on every call and never caches the answer.

use std::io;
use std::path::{Path, PathBuf};

pub const KIB: u64 = 1024;
pub const MIB: u64 = 1024 * KIB;

pub const SHORT_FILE_SIZE: u64 = 4 * KIB;
pub const SHORT_FILE_COUNT: u32 = 512;
pub const LONG_FILE_COUNT: u32 = 3584;
pub const MAX_FILE_COUNT: u32 = SHORT_FILE_COUNT + LONG_FILE_COUNT;
pub const LONG_FILE_MIN: u64 = 16 * MIB;
pub const RESERVE_MIN: u64 = 10 * MIB;
pub const RESERVE_MAX: u64 = 80 * MIB;
pub const SHORT_BUFFER: usize = 4 * 1024;
pub const LONG_BUFFER: usize = 1024 * 1024;

/// Point-in-time view of a device's space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveSpace {
    pub total: u64,
    pub available: u64,
}

pub trait SpaceProbe: Send + Sync {
    fn space(&self, root: &Path) -> io::Result<DriveSpace>;
}

/// Outcome of one capacity decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityBudget {
    pub available: u64,
    pub reserve: u64,
    pub accepted: u64,
}

impl CapacityBudget {
    pub fn fits(&self) -> bool {
        self.accepted > 0
    }
}

/// 0.5% of the device, clamped to `[RESERVE_MIN, RESERVE_MAX]`.
pub fn reserve_for(total: u64) -> u64 {
    (total / 200).clamp(RESERVE_MIN, RESERVE_MAX)
}

/// Size of one long file: the device split into `LONG_FILE_COUNT` pieces,
/// rounded down to whole short units, never below `LONG_FILE_MIN`.
pub fn long_file_length(total: u64) -> u64 {
    let per_file = total / u64::from(LONG_FILE_COUNT);
    let rounded = per_file / SHORT_FILE_SIZE * SHORT_FILE_SIZE;
    rounded.max(LONG_FILE_MIN)
}

/// Pure decision given a live `available` figure.
pub fn plan(requested: u64, available: u64, total: u64) -> CapacityBudget {
    let reserve = reserve_for(total);
    let usable = available.saturating_sub(reserve);
    let accepted = if usable < SHORT_FILE_SIZE || requested == 0 {
        0
    } else if requested <= usable {
        requested
    } else {
        usable / SHORT_FILE_SIZE * SHORT_FILE_SIZE
    };
    CapacityBudget {
        available,
        reserve,
        accepted,
    }
}

pub struct CapacityPlanner<'a> {
    probe: &'a dyn SpaceProbe,
    root: PathBuf,
    total: u64,
}

impl<'a> CapacityPlanner<'a> {
    /// Captures the device's total size once; free space is re-read per call.
    pub fn new(probe: &'a dyn SpaceProbe, root: &Path) -> io::Result<Self> {
        let space = probe.space(root)?;
        Ok(CapacityPlanner {
            probe,
            root: root.to_path_buf(),
            total: space.total,
        })
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn reserve(&self) -> u64 {
        reserve_for(self.total)
    }

    pub fn long_file_length(&self) -> u64 {
        long_file_length(self.total)
    }

    pub fn can_write(&self, requested: u64) -> io::Result<CapacityBudget> {
        let space = self.probe.space(&self.root)?;
        Ok(plan(requested, space.available, self.total))
    }
}
