//! Live device capacity from the operating system.

use std::io;
use std::path::Path;

use sysinfo::Disks;

use crate::capacity::{DriveSpace, SpaceProbe};

/// Queries the OS on every call.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsSpaceProbe;

impl SpaceProbe for OsSpaceProbe {
    fn space(&self, root: &Path) -> io::Result<DriveSpace> {
        drive_space(root)
    }
}

pub fn drive_space(path: &Path) -> io::Result<DriveSpace> {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            unix::drive_space(path)
        } else if #[cfg(windows)] {
            windows::drive_space(path)
        } else {
            let _ = path;
            Err(io::Error::new(io::ErrorKind::Unsupported, "OS-unsupported"))
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::ffi::CString;
    use std::mem;
    use std::os::unix::ffi::OsStrExt;

    pub fn drive_space(path: &Path) -> io::Result<DriveSpace> {
        let path = if path.as_os_str().is_empty() { Path::new(".") } else { path };
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("Invalid path for CString: {}", e))
        })?;
        let mut stat: libc::statvfs = unsafe { mem::zeroed() };
        if unsafe { libc::statvfs(c_path.as_ptr(), &mut stat as *mut _) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let frsize = stat.f_frsize as u64;
        Ok(DriveSpace {
            total: stat.f_blocks as u64 * frsize,
            available: stat.f_bavail as u64 * frsize,
        })
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use std::mem;
    use std::os::windows::ffi::OsStrExt;
    use winapi::um::fileapi::GetDiskFreeSpaceExW;
    use winapi::um::winnt::ULARGE_INTEGER;

    pub fn drive_space(path: &Path) -> io::Result<DriveSpace> {
        let path = if path.as_os_str().is_empty() { Path::new(".") } else { path };
        let mut wide: Vec<u16> = path.as_os_str().encode_wide().collect();
        if wide.last() != Some(&0) {
            wide.push(0);
        }
        let mut free_bytes_available: ULARGE_INTEGER = unsafe { mem::zeroed() };
        let mut total_number_of_bytes: ULARGE_INTEGER = unsafe { mem::zeroed() };
        let mut total_number_of_free_bytes: ULARGE_INTEGER = unsafe { mem::zeroed() };
        let ok = unsafe {
            GetDiskFreeSpaceExW(
                wide.as_ptr(),
                &mut free_bytes_available,
                &mut total_number_of_bytes,
                &mut total_number_of_free_bytes,
            )
        };
        if ok == 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe {
            DriveSpace {
                total: *total_number_of_bytes.QuadPart(),
                available: *free_bytes_available.QuadPart(),
            }
        })
    }
}

fn gib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0 * 1024.0)
}

/// Human-readable summary of the disk holding `path`.
pub fn describe(path: &Path) -> io::Result<String> {
    let canonical = path.canonicalize()?;
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|d| canonical.starts_with(d.mount_point()))
        .max_by_key(|d| d.mount_point().as_os_str().len())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "Disk not found"))?;
    Ok(format!(
        "Disk: {}\nType: {:?}\nTotal Space: {:.2} GB\nAvailable: {:.2} GB",
        disk.mount_point().display(),
        disk.kind(),
        gib(disk.total_space()),
        gib(disk.available_space())
    ))
}
