//! Timestamped diagnostic log shared by the CLI and the test worker.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use indicatif::ProgressBar;
use parking_lot::Mutex;

pub fn current_timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Cloneable handle; every clone writes to the same sinks.
#[derive(Clone, Default)]
pub struct Logger {
    file: Option<Arc<Mutex<File>>>,
    progress: Arc<Mutex<Option<ProgressBar>>>,
    echo: bool,
}

impl Logger {
    /// Log to stderr only.
    pub fn stderr() -> Self {
        Logger {
            echo: true,
            ..Default::default()
        }
    }

    /// Discard everything.
    pub fn silent() -> Self {
        Logger::default()
    }

    /// Log to stderr and append to `path`.
    pub fn with_file(path: &Path) -> io::Result<Self> {
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Logger {
            file: Some(Arc::new(Mutex::new(f))),
            echo: true,
            ..Default::default()
        })
    }

    /// Route console output through `pb` so lines don't tear the bar.
    pub fn attach_progress(&self, pb: ProgressBar) {
        *self.progress.lock() = Some(pb);
    }

    pub fn detach_progress(&self) {
        self.progress.lock().take();
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        self.emit(format!("[{}] {}", current_timestamp(), msg.as_ref()));
    }

    pub fn error<S: AsRef<str>>(&self, category: &str, path: &Path, msg: S) {
        self.emit(format!(
            "[{}] {} at {}: {}",
            current_timestamp(),
            category,
            path.display(),
            msg.as_ref()
        ));
    }

    fn emit(&self, line: String) {
        if self.echo {
            match self.progress.lock().as_ref() {
                Some(pb) => pb.println(line.as_str()),
                None => eprintln!("{}", line),
            }
        }
        if let Some(ref lf) = self.file {
            let mut guard = lf.lock();
            let _ = writeln!(*guard, "{}", line);
            let _ = guard.flush();
        }
    }
}
