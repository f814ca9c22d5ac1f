use serde_json::json;

/// Which statistics bucket an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TestPhase {
    #[default]
    None,
    SaveShortFile,
    SaveLongFile,
    ReadShortFile,
    ReadLongFile,
    ReadAnyContent,
}

impl TestPhase {
    pub const MEASURED: [TestPhase; 5] = [
        TestPhase::SaveShortFile,
        TestPhase::SaveLongFile,
        TestPhase::ReadShortFile,
        TestPhase::ReadLongFile,
        TestPhase::ReadAnyContent,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TestPhase::None => "idle",
            TestPhase::SaveShortFile => "write short",
            TestPhase::SaveLongFile => "write long",
            TestPhase::ReadShortFile => "read short",
            TestPhase::ReadLongFile => "read long",
            TestPhase::ReadAnyContent => "read content",
        }
    }

    pub fn write(short: bool) -> Self {
        if short {
            TestPhase::SaveShortFile
        } else {
            TestPhase::SaveLongFile
        }
    }

    pub fn read(short: bool) -> Self {
        if short {
            TestPhase::ReadShortFile
        } else {
            TestPhase::ReadLongFile
        }
    }

    fn slot(self) -> Option<usize> {
        TestPhase::MEASURED.iter().position(|p| *p == self)
    }
}

/// Immutable accumulator of completed (or in-flight) file operations.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FileTimeInfo {
    pub phase: TestPhase,
    pub file_count: u64,
    pub size_total: u64,
    pub seconds: f64,
    pub error_bytes: u64,
    pub error_files: u64,
}

impl FileTimeInfo {
    pub fn empty(phase: TestPhase) -> Self {
        FileTimeInfo {
            phase,
            ..Default::default()
        }
    }

    /// A single finished file.
    pub fn file(phase: TestPhase, bytes: u64, seconds: f64, error_bytes: u64) -> Self {
        FileTimeInfo {
            phase,
            file_count: 1,
            size_total: bytes,
            seconds,
            error_bytes,
            error_files: u64::from(error_bytes > 0),
        }
    }

    /// Progress of a file that has not finished yet: bytes and time only.
    pub fn partial(phase: TestPhase, bytes: u64, seconds: f64) -> Self {
        FileTimeInfo {
            phase,
            size_total: bytes,
            seconds,
            ..Default::default()
        }
    }

    /// A file the device refused to transfer: every byte counts as an error.
    pub fn failed(phase: TestPhase, bytes: u64) -> Self {
        FileTimeInfo {
            phase,
            file_count: 1,
            error_bytes: bytes,
            error_files: 1,
            ..Default::default()
        }
    }

    pub fn add(&self, other: &FileTimeInfo) -> FileTimeInfo {
        FileTimeInfo {
            phase: if self.phase == TestPhase::None { other.phase } else { self.phase },
            file_count: self.file_count + other.file_count,
            size_total: self.size_total + other.size_total,
            seconds: self.seconds + other.seconds,
            error_bytes: self.error_bytes + other.error_bytes,
            error_files: self.error_files + other.error_files,
        }
    }

    pub fn bytes_per_second(&self) -> f64 {
        if self.seconds > 0.0 {
            self.size_total as f64 / self.seconds
        } else {
            0.0
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        json!({
            "phase": self.phase.label(),
            "file_count": self.file_count,
            "size_total": self.size_total,
            "seconds": self.seconds,
            "error_bytes": self.error_bytes,
            "error_files": self.error_files,
            "mib_s": self.bytes_per_second() / (1024.0 * 1024.0),
        })
    }
}

/// One accumulator per measured phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTable {
    slots: [FileTimeInfo; 5],
}

impl Default for PhaseTable {
    fn default() -> Self {
        PhaseTable {
            slots: TestPhase::MEASURED.map(FileTimeInfo::empty),
        }
    }
}

impl PhaseTable {
    pub fn get(&self, phase: TestPhase) -> FileTimeInfo {
        phase
            .slot()
            .map_or(FileTimeInfo::empty(phase), |i| self.slots[i])
    }

    pub fn record(&mut self, info: &FileTimeInfo) {
        if let Some(i) = info.phase.slot() {
            self.slots[i] = self.slots[i].add(info);
        }
    }

    pub fn clear(&mut self) {
        *self = PhaseTable::default();
    }

    pub fn iter(&self) -> impl Iterator<Item = &FileTimeInfo> {
        self.slots.iter()
    }

    pub fn total_error_files(&self) -> u64 {
        self.slots.iter().map(|s| s.error_files).sum()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Array(self.slots.iter().map(FileTimeInfo::to_json).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_info() -> impl Strategy<Value = FileTimeInfo> {
        (0u64..1_000, 0u64..1 << 40, 0.0f64..1e4, 0u64..1 << 30, 0u64..1_000).prop_map(
            |(file_count, size_total, seconds, error_bytes, error_files)| FileTimeInfo {
                phase: TestPhase::ReadLongFile,
                file_count,
                size_total,
                seconds,
                error_bytes,
                error_files,
            },
        )
    }

    #[test]
    fn single_file_flags_errors() {
        let ok = FileTimeInfo::file(TestPhase::SaveShortFile, 4096, 0.01, 0);
        assert_eq!(ok.error_files, 0);
        let bad = FileTimeInfo::file(TestPhase::ReadShortFile, 4096, 0.01, 3);
        assert_eq!(bad.error_files, 1);
        assert_eq!(bad.error_bytes, 3);
    }

    #[test]
    fn partial_counts_no_file() {
        let p = FileTimeInfo::partial(TestPhase::SaveLongFile, 1 << 20, 0.5);
        assert_eq!(p.file_count, 0);
        assert_eq!(p.size_total, 1 << 20);
    }

    #[test]
    fn table_routes_by_phase() {
        let mut t = PhaseTable::default();
        t.record(&FileTimeInfo::file(TestPhase::SaveShortFile, 4096, 0.1, 0));
        t.record(&FileTimeInfo::file(TestPhase::SaveShortFile, 4096, 0.1, 0));
        t.record(&FileTimeInfo::file(TestPhase::ReadLongFile, 100, 0.1, 2));
        t.record(&FileTimeInfo::file(TestPhase::None, 100, 0.1, 2));
        assert_eq!(t.get(TestPhase::SaveShortFile).file_count, 2);
        assert_eq!(t.get(TestPhase::SaveShortFile).size_total, 8192);
        assert_eq!(t.get(TestPhase::ReadLongFile).error_files, 1);
        assert_eq!(t.total_error_files(), 1);
        t.clear();
        assert_eq!(t, PhaseTable::default());
    }

    #[test]
    fn throughput_and_json() {
        let info = FileTimeInfo::file(TestPhase::SaveLongFile, 2 * 1024 * 1024, 2.0, 0);
        assert_eq!(info.bytes_per_second(), 1024.0 * 1024.0);
        let v = info.to_json();
        assert_eq!(v["phase"], "write long");
        assert_eq!(v["mib_s"], 1.0);
        assert_eq!(FileTimeInfo::empty(TestPhase::ReadAnyContent).bytes_per_second(), 0.0);
    }

    proptest! {
        #[test]
        fn addition_is_fieldwise(a in arb_info(), b in arb_info()) {
            let s = a.add(&b);
            prop_assert_eq!(s.file_count, a.file_count + b.file_count);
            prop_assert_eq!(s.size_total, a.size_total + b.size_total);
            prop_assert_eq!(s.error_bytes, a.error_bytes + b.error_bytes);
            prop_assert_eq!(s.error_files, a.error_files + b.error_files);
            prop_assert!((s.seconds - (a.seconds + b.seconds)).abs() < 1e-9);
            let r = b.add(&a);
            prop_assert_eq!(s.file_count, r.file_count);
            prop_assert_eq!(s.size_total, r.size_total);
        }
    }
}
