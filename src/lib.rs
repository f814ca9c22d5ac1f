//! Endurance testing for removable and fixed drives.
//!
//! A session fills the device with deterministic test files, reads every
//! one back to verify it byte for byte, and can optionally read through all
//! other content on the device. Corrupted files are renamed with a `.bad`
//! extension so later sessions keep them out of the way.
//!
//! ```no_run
//! use std::sync::Arc;
//! use drive_endurance::{Actions, Logger, NullSink, OsSpaceProbe, TestConfig, TestSession};
//!
//! let config = TestConfig::new("/media/usb", Actions::WRITE_TEST_DATA | Actions::READ_TEST_DATA);
//! let session = TestSession::new(config, Arc::new(OsSpaceProbe), Box::new(NullSink), Logger::stderr());
//! let handle = session.spawn()?;
//! let summary = handle.join()?;
//! println!("{}", summary.done.to_json());
//! # Ok::<(), drive_endurance::DriveTestError>(())
//! ```

pub mod capacity;
pub mod clock;
pub mod config;
pub mod drive_info;
pub mod error;
pub mod events;
pub mod io_engine;
pub mod logger;
pub mod naming;
pub mod orchestrator;
pub mod pattern;
pub mod pipeline;
pub mod run_control;
pub mod stats;


pub use capacity::{CapacityBudget, CapacityPlanner, DriveSpace, SpaceProbe};
pub use clock::PrecisionClock;
pub use config::{Actions, TestConfig};
pub use drive_info::OsSpaceProbe;
pub use error::{DriveTestError, Result};
pub use events::{EventSink, NullSink, SessionSummary, StatsSnapshot, TestEvent};
pub use logger::Logger;
pub use naming::TestFileDescriptor;
pub use orchestrator::{SessionHandle, TestSession};
pub use run_control::{RunController, RunState};
pub use stats::{FileTimeInfo, PhaseTable, TestPhase};
