//! Test file naming: `DTEST` + five zero-padded digits + extension.
//!
//! `.dat` marks a regular test file, `.bad` one that already failed
//! verification. Anything else is not a test file.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::capacity::SHORT_FILE_COUNT;

pub const TEST_DIR_NAME: &str = ".drive_endurance";
pub const FILE_PREFIX: &str = "DTEST";
pub const NUMBER_WIDTH: usize = 5;
pub const STEM_LEN: usize = 10;
pub const VALID_EXT: &str = "dat";
pub const CORRUPT_EXT: &str = "bad";
pub const MAX_FILE_NUMBER: u32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TestFileDescriptor {
    pub number: u32,
    pub corrupted: bool,
}

impl TestFileDescriptor {
    pub fn new(number: u32) -> Self {
        TestFileDescriptor {
            number,
            corrupted: false,
        }
    }

    /// Parse a bare file name. Returns `None` when the name is outside the
    /// grammar.
    pub fn parse(name: &str) -> Option<Self> {
        let (stem, ext) = name.rsplit_once('.')?;
        let corrupted = match ext {
            VALID_EXT => false,
            CORRUPT_EXT => true,
            _ => return None,
        };
        if stem.len() != STEM_LEN || !stem.starts_with(FILE_PREFIX) {
            return None;
        }
        let digits = &stem[FILE_PREFIX.len()..];
        if digits.len() != NUMBER_WIDTH || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let number: u32 = digits.parse().ok()?;
        if number == 0 {
            return None;
        }
        Some(TestFileDescriptor { number, corrupted })
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.file_name()
            .and_then(|n| n.to_str())
            .and_then(TestFileDescriptor::parse)
    }

    pub fn file_name(&self) -> String {
        let ext = if self.corrupted { CORRUPT_EXT } else { VALID_EXT };
        format!("{}{:05}.{}", FILE_PREFIX, self.number, ext)
    }

    pub fn is_short(&self) -> bool {
        is_short_number(self.number)
    }

    pub fn as_corrupted(&self) -> Self {
        TestFileDescriptor {
            corrupted: true,
            ..*self
        }
    }
}

pub fn is_short_number(number: u32) -> bool {
    (1..=SHORT_FILE_COUNT).contains(&number)
}

pub fn test_dir(root: &Path) -> PathBuf {
    root.join(TEST_DIR_NAME)
}

/// Create the test directory if needed. The device root itself must exist.
pub fn ensure_test_dir(root: &Path) -> io::Result<PathBuf> {
    let dir = test_dir(root);
    match fs::create_dir(&dir) {
        Ok(()) => Ok(dir),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(dir),
        Err(e) => Err(e),
    }
}

/// All test files (valid and corrupted) in `dir`, sorted by name. A missing
/// directory yields an empty list.
pub fn list_test_files(dir: &Path) -> io::Result<Vec<(PathBuf, TestFileDescriptor)>> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut found = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        if let Some(desc) = TestFileDescriptor::from_path(&path) {
            found.push((path, desc));
        }
    }
    found.sort_by(|a, b| a.0.file_name().cmp(&b.0.file_name()));
    Ok(found)
}

/// Highest number in use, corrupted files included.
pub fn highest_number(dir: &Path) -> io::Result<u32> {
    Ok(list_test_files(dir)?
        .iter()
        .map(|(_, d)| d.number)
        .max()
        .unwrap_or(0))
}

/// Rename `path` to carry the corruption extension. Returns the new path.
pub fn mark_corrupted(path: &Path, desc: &TestFileDescriptor) -> io::Result<PathBuf> {
    let target = path.with_file_name(desc.as_corrupted().file_name());
    fs::rename(path, &target)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fs::File;
    use tempfile::tempdir;

    #[test]
    fn format_is_fixed_width() {
        assert_eq!(TestFileDescriptor::new(1).file_name(), "DTEST00001.dat");
        assert_eq!(TestFileDescriptor::new(4096).file_name(), "DTEST04096.dat");
        assert_eq!(
            TestFileDescriptor::new(99_999).as_corrupted().file_name(),
            "DTEST99999.bad"
        );
    }

    #[test]
    fn rejects_names_outside_grammar() {
        for name in [
            "DTEST0001.dat",
            "DTEST000001.dat",
            "DTEST00001.txt",
            "DTEST0000a.dat",
            "XTEST00001.dat",
            "DTEST00000.dat",
            "DTEST00001",
            "dtest00001.dat",
            "DTEST+0001.dat",
        ] {
            assert_eq!(TestFileDescriptor::parse(name), None, "{}", name);
        }
    }

    #[test]
    fn short_long_threshold() {
        assert!(TestFileDescriptor::new(1).is_short());
        assert!(TestFileDescriptor::new(512).is_short());
        assert!(!TestFileDescriptor::new(513).is_short());
        assert!(!is_short_number(0));
    }

    #[test]
    fn listing_sorts_and_filters() {
        let dir = tempdir().unwrap();
        for name in ["DTEST00010.dat", "DTEST00002.bad", "notes.txt", "DTEST00003.dat"] {
            File::create(dir.path().join(name)).unwrap();
        }
        fs::create_dir(dir.path().join("DTEST00004.dat")).unwrap();

        let found = list_test_files(dir.path()).unwrap();
        let numbers: Vec<u32> = found.iter().map(|(_, d)| d.number).collect();
        assert_eq!(numbers, vec![2, 3, 10]);
        assert!(found[0].1.corrupted);
        assert_eq!(highest_number(dir.path()).unwrap(), 10);
    }

    #[test]
    fn missing_dir_lists_nothing() {
        let dir = tempdir().unwrap();
        assert!(list_test_files(&dir.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_dir_needs_existing_root() {
        let dir = tempdir().unwrap();
        let made = ensure_test_dir(dir.path()).unwrap();
        assert!(made.is_dir());
        assert_eq!(ensure_test_dir(dir.path()).unwrap(), made);
        assert!(ensure_test_dir(&dir.path().join("absent")).is_err());
    }

    #[test]
    fn mark_corrupted_renames() {
        let dir = tempdir().unwrap();
        let p = dir.path().join("DTEST00007.dat");
        File::create(&p).unwrap();
        let desc = TestFileDescriptor::from_path(&p).unwrap();
        let moved = mark_corrupted(&p, &desc).unwrap();
        assert!(!p.exists());
        assert_eq!(moved, dir.path().join("DTEST00007.bad"));
        assert!(TestFileDescriptor::from_path(&moved).unwrap().corrupted);
    }

    proptest! {
        #[test]
        fn name_round_trip(n in 1u32..=MAX_FILE_NUMBER, corrupted in any::<bool>()) {
            let desc = TestFileDescriptor { number: n, corrupted };
            let name = desc.file_name();
            prop_assert_eq!(name.len(), STEM_LEN + 4);
            prop_assert_eq!(TestFileDescriptor::parse(&name), Some(desc));
        }
    }
}
