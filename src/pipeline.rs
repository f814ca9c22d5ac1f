//! Per-file write/read sequences.
//!
//! Writes prefetch: while buffer N is on its way to the device the worker
//! fills buffer N+1. Reads trail: while buffer N is being read the worker
//! verifies buffer N-1. Either way exactly one I/O request overlaps one
//! piece of CPU work, and buffers move strictly in index order.

use std::cmp;
use std::fs::File;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::capacity::{LONG_BUFFER, SHORT_BUFFER};
use crate::clock::PrecisionClock;
use crate::error::{DriveTestError, IoContext, Result};
use crate::io_engine::{new_buffer, open_options, read_full, IoBuffer, IoEngine, DIRECT_IO_ALIGNMENT};
use crate::logger::Logger;
use crate::naming::{self, is_short_number, TestFileDescriptor};
use crate::pattern;
use crate::run_control::RunController;
use crate::stats::{FileTimeInfo, TestPhase};

/// What one file operation produced.
#[derive(Debug, Clone, PartialEq)]
pub struct FileOutcome {
    /// `file_count` is 1 for a finished file, 0 when stopped part way.
    pub info: FileTimeInfo,
    pub stopped: bool,
    /// Set when a test file failed verification twice and was renamed.
    pub corrupted_path: Option<PathBuf>,
}

impl FileOutcome {
    fn finished(info: FileTimeInfo) -> Self {
        FileOutcome {
            info,
            stopped: false,
            corrupted_path: None,
        }
    }

    fn stopped(info: FileTimeInfo) -> Self {
        FileOutcome {
            info,
            stopped: true,
            corrupted_path: None,
        }
    }
}

pub fn buffer_size(file_number: u32) -> usize {
    if is_short_number(file_number) {
        SHORT_BUFFER
    } else {
        LONG_BUFFER
    }
}

fn io_err(path: &Path, msg: &str) -> DriveTestError {
    DriveTestError::io(path, std::io::Error::new(ErrorKind::Other, msg.to_string()))
}

/// The engine slot is filled on first use and then kept for every later file.
fn ready_engine(slot: &mut Option<IoEngine>) -> std::io::Result<&mut IoEngine> {
    if slot.is_none() {
        *slot = Some(IoEngine::spawn()?);
    }
    slot.as_mut()
        .ok_or_else(|| std::io::Error::new(ErrorKind::Other, "I/O engine unavailable"))
}

pub struct FileIOPipeline<'a> {
    controller: &'a RunController,
    clock: PrecisionClock,
    direct_io: bool,
    logger: Logger,
    engine: Option<IoEngine>,
}

impl<'a> FileIOPipeline<'a> {
    pub fn new(controller: &'a RunController, direct_io: bool, logger: Logger) -> Self {
        FileIOPipeline {
            controller,
            clock: PrecisionClock::started(),
            direct_io,
            logger,
            engine: None,
        }
    }

    fn should_stop(&mut self) -> bool {
        self.controller.should_stop_timed(&mut self.clock)
    }

    /// Create `path` and fill it with `length` bytes of the pattern for
    /// `file_number`, then sync it.
    pub fn write_file(
        &mut self,
        path: &Path,
        file_number: u32,
        length: u64,
        phase: TestPhase,
        progress: &mut dyn FnMut(&FileTimeInfo),
    ) -> Result<FileOutcome> {
        let buf_len = buffer_size(file_number);
        let engine = ready_engine(&mut self.engine).at(path)?;
        let mut file = open_options(false, true, true, self.direct_io)
            .open(path)
            .at(path)?;
        let mut current = new_buffer(buf_len, self.direct_io);
        let mut next = new_buffer(buf_len, self.direct_io);
        let first = cmp::min(buf_len as u64, length) as usize;
        pattern::fill(&mut current[..first], file_number, 0);

        let start = self.clock.ticks();
        let mut written = 0u64;
        let mut index = 0u64;
        while written < length {
            if self.controller.should_stop_timed(&mut self.clock) {
                let secs = self.clock.seconds_since(start);
                return Ok(FileOutcome::stopped(FileTimeInfo::partial(phase, written, secs)));
            }
            let len = cmp::min(buf_len as u64, length - written) as usize;
            engine.submit_write(file, current, len).at(path)?;

            let next_offset = written + len as u64;
            if next_offset < length {
                let next_len = cmp::min(buf_len as u64, length - next_offset) as usize;
                pattern::fill(&mut next[..next_len], file_number, index + 1);
            }

            let done = engine.wait().at(path)?;
            done.result.at(path)?;
            file = done.file;
            current = next;
            next = done.buf;
            written += len as u64;
            index += 1;
            progress(&FileTimeInfo::partial(phase, written, self.clock.seconds_since(start)));
        }

        file.sync_all().at(path)?;
        drop(file);
        let secs = self.clock.seconds_since(start);
        Ok(FileOutcome::finished(FileTimeInfo::file(phase, written, secs, 0)))
    }

    /// Read a test file and compare every buffer with the expected pattern.
    pub fn read_file(
        &mut self,
        path: &Path,
        file_number: u32,
        phase: TestPhase,
        progress: &mut dyn FnMut(&FileTimeInfo),
    ) -> Result<FileOutcome> {
        let buf_len = buffer_size(file_number);
        let engine = ready_engine(&mut self.engine).at(path)?;
        let length = std::fs::metadata(path).at(path)?.len();
        let direct = self.direct_io && length % DIRECT_IO_ALIGNMENT as u64 == 0;
        let mut file = open_options(true, false, false, direct).open(path).at(path)?;
        let mut spare: Option<IoBuffer> = Some(new_buffer(buf_len, direct));
        // Buffer read last time round, with its length and index.
        let mut trailing: Option<(IoBuffer, usize, u64)> = None;

        let start = self.clock.ticks();
        let mut offset = 0u64;
        let mut errors = 0u64;
        let mut index = 0u64;
        let mut stopped = false;
        while offset < length {
            if self.controller.should_stop_timed(&mut self.clock) {
                stopped = true;
                break;
            }
            let len = cmp::min(buf_len as u64, length - offset) as usize;
            let buf = match spare.take() {
                Some(b) => b,
                None => new_buffer(buf_len, direct),
            };
            engine.submit_read(file, buf, len).at(path)?;

            spare = match trailing.take() {
                Some((prev, prev_len, prev_index)) => {
                    errors += pattern::verify(&prev[..prev_len], file_number, prev_index);
                    Some(prev)
                }
                None => Some(new_buffer(buf_len, direct)),
            };

            let done = engine.wait().at(path)?;
            file = done.file;
            let got = done.result.at(path)?;
            offset += got as u64;
            trailing = Some((done.buf, got, index));
            index += 1;
            progress(&FileTimeInfo::partial(phase, offset, self.clock.seconds_since(start)));
            if got < len {
                // File shrank underneath us.
                errors += length - offset;
                break;
            }
        }

        if let Some((prev, prev_len, prev_index)) = trailing.take() {
            errors += pattern::verify(&prev[..prev_len], file_number, prev_index);
        }
        let secs = self.clock.seconds_since(start);
        if stopped {
            let mut info = FileTimeInfo::partial(phase, offset, secs);
            info.error_bytes = errors;
            return Ok(FileOutcome::stopped(info));
        }
        Ok(FileOutcome::finished(FileTimeInfo::file(phase, offset, secs, errors)))
    }

    /// Read and verify a test file; on mismatch read it once more and, if
    /// the errors persist, rename it with the corruption extension.
    pub fn verify_test_file(
        &mut self,
        path: &Path,
        desc: &TestFileDescriptor,
        phase: TestPhase,
        progress: &mut dyn FnMut(&FileTimeInfo),
    ) -> Result<FileOutcome> {
        let first = self.read_file(path, desc.number, phase, progress)?;
        if first.stopped || first.info.error_bytes == 0 {
            return Ok(first);
        }
        self.logger.error(
            "Data Mismatch",
            path,
            format!("{} bytes differ, reading again", first.info.error_bytes),
        );
        let mut second = self.read_file(path, desc.number, phase, progress)?;
        if second.stopped || second.info.error_bytes == 0 {
            return Ok(second);
        }
        match naming::mark_corrupted(path, desc) {
            Ok(target) => {
                self.logger
                    .info(format!("Marked {} as corrupted: {}", path.display(), target.display()));
                second.corrupted_path = Some(target);
            }
            Err(e) => self.logger.error("Rename Error", path, e.to_string()),
        }
        Ok(second)
    }

    /// Stream an arbitrary file through memory. Nothing to compare against,
    /// so only readability and latency are measured.
    pub fn drain_file(
        &mut self,
        path: &Path,
        phase: TestPhase,
        progress: &mut dyn FnMut(&FileTimeInfo),
    ) -> Result<FileOutcome> {
        let mut file = File::open(path).at(path)?;
        let expected = file.metadata().at(path)?.len();
        let mut buf = new_buffer(LONG_BUFFER, false);
        let start = self.clock.ticks();
        let mut total = 0u64;
        loop {
            if self.should_stop() {
                let secs = self.clock.seconds_since(start);
                return Ok(FileOutcome::stopped(FileTimeInfo::partial(phase, total, secs)));
            }
            let n = read_full(&mut file, &mut buf[..]).at(path)?;
            total += n as u64;
            progress(&FileTimeInfo::partial(phase, total, self.clock.seconds_since(start)));
            if n < LONG_BUFFER {
                break;
            }
        }
        if total < expected {
            return Err(io_err(path, "file ended before its reported length"));
        }
        let secs = self.clock.seconds_since(start);
        Ok(FileOutcome::finished(FileTimeInfo::file(phase, total, secs, 0)))
    }
}
