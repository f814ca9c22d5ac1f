//! Progress and completion notifications.
//!
//! Observers get immutable snapshots, either pushed through an
//! [`EventSink`] or pulled from a [`SnapshotCell`]. Nothing the worker is
//! still mutating ever crosses the thread boundary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use parking_lot::RwLock;

use crate::stats::{FileTimeInfo, PhaseTable, TestPhase};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatsSnapshot {
    pub phase: TestPhase,
    /// Completed files of `phase` plus the file currently in flight.
    pub live: FileTimeInfo,
    /// Completed files only, every phase.
    pub done: PhaseTable,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct SessionSummary {
    pub done: PhaseTable,
    /// True when the session ended because of a stop request.
    pub stopped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TestEvent {
    PhaseStarted(TestPhase),
    Progress(Arc<StatsSnapshot>),
    FileCorrupted { path: PathBuf, error_bytes: u64 },
    Done(SessionSummary),
}

pub trait EventSink: Send + Sync {
    fn publish(&self, event: TestEvent);
}

impl EventSink for Sender<TestEvent> {
    fn publish(&self, event: TestEvent) {
        // A vanished observer must not disturb the run.
        let _ = self.send(event);
    }
}

pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _event: TestEvent) {}
}

/// Most recent snapshot, replaced wholesale on every publication.
#[derive(Default)]
pub struct SnapshotCell {
    current: RwLock<Arc<StatsSnapshot>>,
}

impl SnapshotCell {
    pub fn store(&self, snapshot: Arc<StatsSnapshot>) {
        *self.current.write() = snapshot;
    }

    pub fn load(&self) -> Arc<StatsSnapshot> {
        Arc::clone(&self.current.read())
    }
}

/// Rate limiter for progress publication.
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        ProgressThrottle {
            interval,
            last: None,
        }
    }

    /// True when a publication is due; records it as made.
    pub fn ready(&mut self, force: bool) -> bool {
        let now = Instant::now();
        let due = force
            || self
                .last
                .map_or(true, |last| now.duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }
}
