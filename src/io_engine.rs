//! One-request-in-flight overlapped file I/O.
//!
//! The worker hands an owned buffer to [`IoEngine`], keeps computing, then
//! calls [`IoEngine::wait`] to get the buffer back together with the result.
//! The request itself runs on one long-lived submission thread; the file
//! handle travels with each request, so a single engine serves every file
//! of a session. At most one request is ever outstanding.

use std::fs::{File, OpenOptions};
use std::io::{self, ErrorKind, Read, Write};
use std::thread::{self, JoinHandle};

use aligned_vec::{AVec, RuntimeAlign};
use crossbeam_channel::{bounded, Receiver, Sender};

#[cfg(target_os = "linux")]
use std::os::unix::fs::OpenOptionsExt;
#[cfg(target_os = "windows")]
use std::os::windows::fs::OpenOptionsExt;
#[cfg(target_os = "windows")]
use winapi::um::winbase::{FILE_FLAG_NO_BUFFERING, FILE_FLAG_WRITE_THROUGH};

pub const DIRECT_IO_ALIGNMENT: usize = 4096;

pub type IoBuffer = AVec<u8, RuntimeAlign>;

pub fn new_buffer(len: usize, direct_io: bool) -> IoBuffer {
    let alignment = if direct_io { DIRECT_IO_ALIGNMENT } else { 1 };
    let mut v = IoBuffer::with_capacity(alignment, len);
    for _ in 0..len {
        v.push(0);
    }
    v
}

/// Direct I/O is a request, not a guarantee: platforms without a bypass
/// flag silently get buffered I/O.
pub fn open_options(read: bool, write: bool, create: bool, direct_io: bool) -> OpenOptions {
    let mut opts = OpenOptions::new();
    opts.read(read).write(write);
    if create {
        opts.create(true).truncate(true);
    }
    if direct_io {
        #[cfg(target_os = "linux")]
        {
            opts.custom_flags(libc::O_DIRECT);
        }
        #[cfg(target_os = "windows")]
        {
            opts.custom_flags(FILE_FLAG_NO_BUFFERING | FILE_FLAG_WRITE_THROUGH);
        }
    }
    opts
}

/// Read until `buf` is full or EOF. Returns the number of bytes read.
pub fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

enum Request {
    Write { file: File, buf: IoBuffer, len: usize },
    Read { file: File, buf: IoBuffer, len: usize },
}

/// A finished request. The file handle and buffer come back with it.
pub struct Completion {
    pub file: File,
    pub buf: IoBuffer,
    /// Bytes transferred.
    pub result: io::Result<usize>,
}

fn gone() -> io::Error {
    io::Error::new(ErrorKind::BrokenPipe, "I/O submission thread is gone")
}

pub struct IoEngine {
    requests: Option<Sender<Request>>,
    completions: Receiver<Completion>,
    worker: Option<JoinHandle<()>>,
    in_flight: bool,
}

impl IoEngine {
    /// Start the submission thread. It lives until the engine is dropped and
    /// serves every file the owner hands it.
    pub fn spawn() -> io::Result<Self> {
        let (req_tx, req_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(1);
        let worker = thread::Builder::new()
            .name("io-submit".into())
            .spawn(move || serve(req_rx, done_tx))?;
        Ok(IoEngine {
            requests: Some(req_tx),
            completions: done_rx,
            worker: Some(worker),
            in_flight: false,
        })
    }

    #[cfg(test)]
    pub(crate) fn worker_id(&self) -> Option<thread::ThreadId> {
        self.worker.as_ref().map(|w| w.thread().id())
    }

    pub fn submit_write(&mut self, file: File, buf: IoBuffer, len: usize) -> io::Result<()> {
        self.submit(Request::Write { file, buf, len })
    }

    pub fn submit_read(&mut self, file: File, buf: IoBuffer, len: usize) -> io::Result<()> {
        self.submit(Request::Read { file, buf, len })
    }

    fn submit(&mut self, req: Request) -> io::Result<()> {
        if self.in_flight {
            return Err(io::Error::new(ErrorKind::Other, "a request is already in flight"));
        }
        let requests = self.requests.as_ref().ok_or_else(gone)?;
        requests.send(req).map_err(|_| gone())?;
        self.in_flight = true;
        Ok(())
    }

    /// Block until the outstanding request completes.
    pub fn wait(&mut self) -> io::Result<Completion> {
        if !self.in_flight {
            return Err(io::Error::new(ErrorKind::Other, "no request in flight"));
        }
        self.in_flight = false;
        self.completions.recv().map_err(|_| gone())
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn serve(requests: Receiver<Request>, completions: Sender<Completion>) {
    for req in requests.iter() {
        let done = match req {
            Request::Write { mut file, buf, len } => {
                let result = file.write_all(&buf[..len]).map(|_| len);
                Completion { file, buf, result }
            }
            Request::Read { mut file, mut buf, len } => {
                let result = read_full(&mut file, &mut buf[..len]);
                Completion { file, buf, result }
            }
        };
        if completions.send(done).is_err() {
            break;
        }
    }
}
