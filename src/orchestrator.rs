//! Test session: phase sequencing, statistics and notifications.
//!
//! A session runs on exactly one worker thread. Callers steer it through the
//! shared [`RunController`] and observe it through events or the latest
//! published snapshot. The worker always ends with [`TestEvent::Done`], even
//! after I/O failures, a stop request or a panic inside a phase.

use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::capacity::{CapacityPlanner, SpaceProbe, MAX_FILE_COUNT, SHORT_FILE_SIZE};
use crate::config::{format_bytes, Actions, TestConfig};
use crate::error::{DriveTestError, Result};
use crate::events::{EventSink, SessionSummary, SnapshotCell, StatsSnapshot, TestEvent, ProgressThrottle};
use crate::logger::Logger;
use crate::naming::{self, TestFileDescriptor};
use crate::pipeline::{FileIOPipeline, FileOutcome};
use crate::run_control::{RunController, RunState};
use crate::stats::{FileTimeInfo, PhaseTable, TestPhase};

/// Consecutive failed file writes after which the write phase gives up.
pub const MAX_CONSECUTIVE_WRITE_FAILURES: u32 = 3;

pub struct TestSession {
    config: TestConfig,
    probe: Arc<dyn SpaceProbe>,
    controller: Arc<RunController>,
    sink: Box<dyn EventSink>,
    logger: Logger,
    latest: Arc<SnapshotCell>,
}

impl TestSession {
    pub fn new(
        config: TestConfig,
        probe: Arc<dyn SpaceProbe>,
        sink: Box<dyn EventSink>,
        logger: Logger,
    ) -> Self {
        let controller = Arc::new(RunController::new(config.pause_poll));
        TestSession {
            config,
            probe,
            controller,
            sink,
            logger,
            latest: Arc::new(SnapshotCell::default()),
        }
    }

    pub fn controller(&self) -> Arc<RunController> {
        Arc::clone(&self.controller)
    }

    pub fn latest(&self) -> Arc<StatsSnapshot> {
        self.latest.load()
    }

    /// Run every requested phase on the calling thread.
    pub fn run(&self) -> SessionSummary {
        self.controller.request(RunState::Run);
        self.logger.info(format!(
            "Starting test session on {} (actions {:#05b})",
            self.config.root.display(),
            self.config.actions.bits()
        ));

        let mut worker = Worker::new(self);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| worker.run_phases()));
        if outcome.is_err() {
            self.logger.info("A test phase panicked; finishing the session");
        }

        let stopped = self.controller.state() != RunState::Run;
        self.controller.request(RunState::Stop);
        self.controller.request(RunState::None);

        let last = FileTimeInfo::empty(worker.reporter.phase);
        worker.reporter.publish(&last, true);
        let summary = SessionSummary {
            done: worker.reporter.done.clone(),
            stopped,
        };
        self.logger.info(if stopped {
            "Test session stopped"
        } else {
            "Test session completed"
        });
        self.sink.publish(TestEvent::Done(summary.clone()));
        summary
    }

    /// Run the session on its own worker thread.
    pub fn spawn(self) -> Result<SessionHandle> {
        let controller = self.controller();
        let latest = Arc::clone(&self.latest);
        let worker = thread::Builder::new()
            .name("drive-test-worker".into())
            .spawn(move || self.run())
            .map_err(|e| DriveTestError::io(Path::new("<worker thread>"), e))?;
        Ok(SessionHandle {
            controller,
            latest,
            worker,
        })
    }
}

/// Caller-side view of a spawned session.
pub struct SessionHandle {
    controller: Arc<RunController>,
    latest: Arc<SnapshotCell>,
    worker: JoinHandle<SessionSummary>,
}

impl SessionHandle {
    pub fn request(&self, state: RunState) -> bool {
        self.controller.request(state)
    }

    pub fn pause(&self) -> bool {
        self.request(RunState::Pause)
    }

    pub fn resume(&self) -> bool {
        self.request(RunState::Run)
    }

    pub fn stop(&self) -> bool {
        self.request(RunState::Stop)
    }

    pub fn is_running(&self) -> bool {
        matches!(self.controller.state(), RunState::Run | RunState::Pause)
    }

    pub fn is_stopping(&self) -> bool {
        self.controller.state() == RunState::Stop
    }

    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }

    pub fn latest(&self) -> Arc<StatsSnapshot> {
        self.latest.load()
    }

    pub fn join(self) -> Result<SessionSummary> {
        self.worker.join().map_err(|_| DriveTestError::WorkerPanicked)
    }
}

/// Done-table bookkeeping plus throttled publication.
struct Reporter<'a> {
    sink: &'a dyn EventSink,
    latest: &'a SnapshotCell,
    throttle: ProgressThrottle,
    phase: TestPhase,
    done: PhaseTable,
}

impl Reporter<'_> {
    /// Start of an orchestration phase: announced and published at once.
    fn begin_phase(&mut self, phase: TestPhase) {
        self.phase = phase;
        self.sink.publish(TestEvent::PhaseStarted(phase));
        self.publish(&FileTimeInfo::empty(phase), true);
    }

    /// Move to another statistics bucket within the same phase. Publication
    /// stays subject to the throttle.
    fn switch_bucket(&mut self, phase: TestPhase) {
        self.phase = phase;
    }

    fn record(&mut self, info: &FileTimeInfo) {
        self.done.record(info);
    }

    /// Publish `done[phase] + in_flight` if the throttle allows it.
    fn publish(&mut self, in_flight: &FileTimeInfo, force: bool) {
        if !self.throttle.ready(force) {
            return;
        }
        let snapshot = Arc::new(StatsSnapshot {
            phase: self.phase,
            live: self.done.get(self.phase).add(in_flight),
            done: self.done.clone(),
        });
        self.latest.store(Arc::clone(&snapshot));
        self.sink.publish(TestEvent::Progress(snapshot));
    }
}

struct Worker<'a> {
    session: &'a TestSession,
    pipeline: FileIOPipeline<'a>,
    reporter: Reporter<'a>,
}

impl<'a> Worker<'a> {
    fn new(session: &'a TestSession) -> Self {
        Worker {
            session,
            pipeline: FileIOPipeline::new(
                &session.controller,
                session.config.direct_io,
                session.logger.clone(),
            ),
            reporter: Reporter {
                sink: session.sink.as_ref(),
                latest: &session.latest,
                throttle: ProgressThrottle::new(session.config.progress_interval),
                phase: TestPhase::None,
                done: PhaseTable::default(),
            },
        }
    }

    fn stopping(&self) -> bool {
        self.session.controller.should_stop()
    }

    fn run_phases(&mut self) {
        self.reporter.done.clear();
        let actions = self.session.config.actions;
        if actions.contains(Actions::WRITE_TEST_DATA) && !self.stopping() {
            self.write_phase();
        }
        if actions.contains(Actions::READ_TEST_DATA) && !self.stopping() {
            self.read_test_files_phase();
        }
        if actions.contains(Actions::READ_CONTENT) && !self.stopping() {
            self.read_content_phase();
        }
    }

    fn write_phase(&mut self) {
        let root = self.session.config.root.clone();
        let log = self.session.logger.clone();
        let dir = match naming::ensure_test_dir(&root) {
            Ok(d) => d,
            Err(e) => return log.error("Create Error", &naming::test_dir(&root), e.to_string()),
        };
        let planner = match CapacityPlanner::new(self.session.probe.as_ref(), &root) {
            Ok(p) => p,
            Err(e) => return log.error("Capacity Error", &root, e.to_string()),
        };
        let mut number = match naming::highest_number(&dir) {
            Ok(n) => n,
            Err(e) => return log.error("List Error", &dir, e.to_string()),
        };
        let (lf, lu) = format_bytes(planner.long_file_length());
        let (rf, ru) = format_bytes(planner.reserve());
        log.info(format!(
            "Write phase: continuing after file {}, long files {:.2} {}, reserve {:.2} {}",
            number, lf, lu, rf, ru
        ));
        self.reporter
            .begin_phase(TestPhase::write(naming::is_short_number(number + 1)));

        let mut created = 0u32;
        let mut failures = 0u32;
        loop {
            if self.stopping() {
                break;
            }
            if self.session.config.max_new_files.map_or(false, |max| created >= max) {
                break;
            }
            number += 1;
            if number > MAX_FILE_COUNT {
                log.info("Write phase: file count ceiling reached");
                break;
            }
            let desc = TestFileDescriptor::new(number);
            let short = desc.is_short();
            let requested = if short {
                SHORT_FILE_SIZE
            } else {
                planner.long_file_length()
            };
            let budget = match planner.can_write(requested) {
                Ok(b) => b,
                Err(e) => {
                    log.error("Capacity Error", &root, e.to_string());
                    break;
                }
            };
            if !budget.fits() {
                log.info("Write phase: free space down to the reserve");
                break;
            }

            let path = dir.join(desc.file_name());
            let phase = TestPhase::write(short);
            self.reporter.switch_bucket(phase);
            let reporter = &mut self.reporter;
            let written = self.pipeline.write_file(
                &path,
                number,
                budget.accepted,
                phase,
                &mut |p| reporter.publish(p, false),
            );
            match written {
                Ok(out) if out.stopped => break,
                Ok(out) => {
                    self.reporter.record(&out.info);
                    failures = 0;
                    created += 1;
                }
                Err(e) => {
                    log.error("Write Error", &path, e.to_string());
                    self.reporter.record(&FileTimeInfo::failed(phase, budget.accepted));
                    failures += 1;
                    if failures >= MAX_CONSECUTIVE_WRITE_FAILURES {
                        log.info("Write phase: giving up after repeated write failures");
                        break;
                    }
                    continue;
                }
            }

            // Write verification: read the file straight back. This is
            // accounted as read traffic, not as an independent read phase.
            let phase = TestPhase::read(short);
            if !self.verify_one(&path, &desc, phase, budget.accepted) {
                break;
            }
        }
    }

    fn read_test_files_phase(&mut self) {
        let dir = naming::test_dir(&self.session.config.root);
        let files = match naming::list_test_files(&dir) {
            Ok(f) => f,
            Err(e) => return self.session.logger.error("List Error", &dir, e.to_string()),
        };
        self.session
            .logger
            .info(format!("Read phase: {} test files", files.len()));
        let first_short = files
            .iter()
            .find(|(_, d)| !d.corrupted)
            .map_or(true, |(_, d)| d.is_short());
        self.reporter.begin_phase(TestPhase::read(first_short));
        for (path, desc) in files {
            if self.stopping() {
                break;
            }
            if desc.corrupted {
                continue;
            }
            let expected = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
            if !self.verify_one(&path, &desc, TestPhase::read(desc.is_short()), expected) {
                break;
            }
        }
    }

    /// Read back one test file and record it. Returns false when stopped.
    fn verify_one(
        &mut self,
        path: &Path,
        desc: &TestFileDescriptor,
        phase: TestPhase,
        expected: u64,
    ) -> bool {
        self.reporter.switch_bucket(phase);
        let reporter = &mut self.reporter;
        let result = self
            .pipeline
            .verify_test_file(path, desc, phase, &mut |p| reporter.publish(p, false));
        match result {
            Ok(out) => self.record_read(out),
            Err(e) => {
                self.session.logger.error("Read Error", path, e.to_string());
                self.reporter.record(&FileTimeInfo::failed(phase, expected));
                true
            }
        }
    }

    fn record_read(&mut self, out: FileOutcome) -> bool {
        if out.stopped {
            return false;
        }
        self.reporter.record(&out.info);
        if let Some(path) = out.corrupted_path {
            self.reporter.sink.publish(TestEvent::FileCorrupted {
                path,
                error_bytes: out.info.error_bytes,
            });
        }
        true
    }

    /// Depth-first walk of the whole device with an explicit stack. The test
    /// directory is skipped and symlinks are never followed.
    fn read_content_phase(&mut self) {
        let root = self.session.config.root.clone();
        let skip = naming::test_dir(&root);
        let log = self.session.logger.clone();
        let phase = TestPhase::ReadAnyContent;
        self.reporter.begin_phase(phase);

        let mut stack: Vec<PathBuf> = vec![root];
        while let Some(dir) = stack.pop() {
            if self.stopping() {
                return;
            }
            let (files, mut subdirs) = match scan_dir(&dir, &skip) {
                Ok(found) => found,
                Err(e) => {
                    log.error("List Error", &dir, e.to_string());
                    continue;
                }
            };
            subdirs.sort();
            stack.extend(subdirs.into_iter().rev());

            for path in files {
                if self.stopping() {
                    return;
                }
                let reporter = &mut self.reporter;
                let drained = self
                    .pipeline
                    .drain_file(&path, phase, &mut |p| reporter.publish(p, false));
                match drained {
                    Ok(out) if out.stopped => return,
                    Ok(out) => self.reporter.record(&out.info),
                    Err(e) => {
                        log.error("Read Error", &path, e.to_string());
                        let size = fs::symlink_metadata(&path).map(|m| m.len()).unwrap_or(0);
                        self.reporter.record(&FileTimeInfo::failed(phase, size));
                    }
                }
            }
        }
    }
}

/// Regular files (sorted) and subdirectories of `dir`.
fn scan_dir(dir: &Path, skip: &Path) -> std::io::Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut files = Vec::new();
    let mut subdirs = Vec::new();
    for entry in fs::read_dir(dir)? {
        let Ok(entry) = entry else { continue };
        let Ok(kind) = entry.file_type() else { continue };
        let path = entry.path();
        if kind.is_dir() {
            if path != skip {
                subdirs.push(path);
            }
        } else if kind.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok((files, subdirs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capacity::DriveSpace;
    use crate::events::NullSink;
    use std::io;
    use tempfile::tempdir;

    struct Plenty;

    impl SpaceProbe for Plenty {
        fn space(&self, _root: &Path) -> io::Result<DriveSpace> {
            Ok(DriveSpace {
                total: 1 << 40,
                available: 1 << 39,
            })
        }
    }

    #[test]
    fn scan_dir_splits_and_skips() {
        let dir = tempdir().unwrap();
        let skip = dir.path().join(".drive_endurance");
        fs::create_dir(&skip).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.txt"), b"b").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();

        let (files, subdirs) = scan_dir(dir.path(), &skip).unwrap();
        assert_eq!(files, vec![dir.path().join("a.txt"), dir.path().join("b.txt")]);
        assert_eq!(subdirs, vec![dir.path().join("sub")]);
    }

    #[test]
    fn stop_before_start_still_reports_done() {
        let dir = tempdir().unwrap();
        let session = TestSession::new(
            TestConfig::new(dir.path(), Actions::ALL),
            Arc::new(Plenty),
            Box::new(NullSink),
            Logger::silent(),
        );
        session.controller().request(RunState::Stop);
        let summary = session.run();
        assert!(summary.stopped);
        assert_eq!(summary.done, PhaseTable::default());
        assert_eq!(session.controller().state(), RunState::None);
    }

    #[test]
    fn unreadable_root_is_survivable() {
        let dir = tempdir().unwrap();
        let session = TestSession::new(
            TestConfig::new(dir.path().join("gone"), Actions::ALL),
            Arc::new(Plenty),
            Box::new(NullSink),
            Logger::silent(),
        );
        let summary = session.run();
        assert!(!summary.stopped);
        assert_eq!(summary.done.get(TestPhase::SaveShortFile).file_count, 0);
    }
}
