use std::ops::BitOr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{DriveTestError, Result};
use crate::run_control::DEFAULT_PAUSE_POLL;

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Which phases a session runs. Any combination is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Actions(u8);

impl Actions {
    pub const NONE: Actions = Actions(0);
    pub const WRITE_TEST_DATA: Actions = Actions(1);
    pub const READ_TEST_DATA: Actions = Actions(2);
    pub const READ_CONTENT: Actions = Actions(4);
    pub const ALL: Actions = Actions(7);

    pub fn contains(self, other: Actions) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Actions {
    type Output = Actions;

    fn bitor(self, rhs: Actions) -> Actions {
        Actions(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct TestConfig {
    /// Root of the device under test.
    pub root: PathBuf,
    pub actions: Actions,
    pub progress_interval: Duration,
    pub pause_poll: Duration,
    /// Upper bound on files created by one write phase.
    pub max_new_files: Option<u32>,
    pub direct_io: bool,
}

impl Default for TestConfig {
    fn default() -> Self {
        TestConfig {
            root: PathBuf::from("."),
            actions: Actions::WRITE_TEST_DATA,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            pause_poll: DEFAULT_PAUSE_POLL,
            max_new_files: None,
            direct_io: false,
        }
    }
}

impl TestConfig {
    pub fn new(root: impl Into<PathBuf>, actions: Actions) -> Self {
        TestConfig {
            root: root.into(),
            actions,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.actions.is_empty() {
            return Err(DriveTestError::InvalidConfig("no test action selected".into()));
        }
        if !self.root.is_dir() {
            return Err(DriveTestError::InvalidConfig(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        if self.pause_poll.is_zero() {
            return Err(DriveTestError::InvalidConfig("pause poll interval must be non-zero".into()));
        }
        Ok(())
    }
}

pub fn parse_size_with_suffix(s: &str) -> Result<u64> {
    let invalid = |msg: String| DriveTestError::InvalidSize(msg);
    let s_trimmed = s.trim();
    if s_trimmed.is_empty() {
        return Err(invalid("Input string is empty".to_string()));
    }
    let first_non_digit_idx = s_trimmed.find(|c: char| !c.is_ascii_digit());
    let (num_str, suffix_orig) = match first_non_digit_idx {
        Some(0) => {
            return Err(invalid(format!("missing numeric value in '{}'", s_trimmed)));
        }
        Some(idx) => s_trimmed.split_at(idx),
        None => (s_trimmed, ""),
    };
    let num = num_str
        .parse::<u64>()
        .map_err(|_| invalid(format!("Invalid number: '{}' in '{}'", num_str, s_trimmed)))?;
    let suffix = suffix_orig.trim_start().to_uppercase();
    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024 * 1024 * 1024 * 1024,
        _ => {
            return Err(invalid(format!(
                "Unknown or misplaced size suffix: '{}' in '{}'",
                suffix_orig, s_trimmed
            )))
        }
    };
    Ok(num.saturating_mul(multiplier))
}

/// Scale a byte count for display.
pub fn format_bytes(bytes: u64) -> (f64, &'static str) {
    const KIB_F: f64 = 1024.0;
    const MIB_F: f64 = KIB_F * 1024.0;
    const GIB_F: f64 = MIB_F * 1024.0;
    const TIB_F: f64 = GIB_F * 1024.0;
    if bytes < 1024 {
        return (bytes as f64, "Bytes");
    }
    let bytes_f = bytes as f64;
    if bytes_f < MIB_F {
        (bytes_f / KIB_F, "KiB")
    } else if bytes_f < GIB_F {
        (bytes_f / MIB_F, "MiB")
    } else if bytes_f < TIB_F {
        (bytes_f / GIB_F, "GiB")
    } else {
        (bytes_f / TIB_F, "TiB")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn action_mask() {
        let a = Actions::WRITE_TEST_DATA | Actions::READ_CONTENT;
        assert!(a.contains(Actions::WRITE_TEST_DATA));
        assert!(a.contains(Actions::READ_CONTENT));
        assert!(!a.contains(Actions::READ_TEST_DATA));
        assert!(!a.contains(Actions::NONE));
        assert_eq!(a.bits(), 5);
        assert!(Actions::ALL.contains(a));
        assert!(Actions::NONE.is_empty());
    }

    #[test]
    fn sizes() {
        assert_eq!(parse_size_with_suffix("4096").unwrap(), 4096);
        assert_eq!(parse_size_with_suffix("4K").unwrap(), 4096);
        assert_eq!(parse_size_with_suffix(" 16 MiB ").unwrap(), 16 * 1024 * 1024);
        assert_eq!(parse_size_with_suffix("2g").unwrap(), 2 * 1024 * 1024 * 1024);
        assert!(parse_size_with_suffix("").is_err());
        assert!(parse_size_with_suffix("K").is_err());
        assert!(parse_size_with_suffix("12Q").is_err());
    }

    #[test]
    fn format_scales() {
        assert_eq!(format_bytes(512), (512.0, "Bytes"));
        assert_eq!(format_bytes(4096), (4.0, "KiB"));
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), (3.0, "GiB"));
    }

    #[test]
    fn validation() {
        let dir = tempdir().unwrap();
        assert!(TestConfig::new(dir.path(), Actions::ALL).validate().is_ok());
        assert!(TestConfig::new(dir.path(), Actions::NONE).validate().is_err());
        assert!(TestConfig::new(dir.path().join("missing"), Actions::ALL)
            .validate()
            .is_err());
    }
}
