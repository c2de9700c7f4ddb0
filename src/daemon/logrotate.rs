//! Reopening stdout/stderr on their log files (after external rotation).

use std::fs::OpenOptions;
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use tracing::warn;

/// errno per stream; `None` means the stream was reopened (or not requested).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RotateOutcome {
    pub stdout_errno: Option<i32>,
    pub stderr_errno: Option<i32>,
}

impl RotateOutcome {
    pub fn is_ok(&self) -> bool {
        self.stdout_errno.is_none() && self.stderr_errno.is_none()
    }
}

/// Reopen fd 1 and fd 2 on their log files.
///
/// When both paths are the same, stderr is duplicated from the freshly
/// opened stdout so the two share one file offset. Failures are recorded in
/// the outcome and logged; they never abort the process.
pub fn rotate_logs(
    stdout_path: Option<&Path>,
    stderr_path: Option<&Path>,
    stdout_mode: u32,
    stderr_mode: u32,
) -> RotateOutcome {
    let outcome = reopen_pair(
        stdout_path,
        stderr_path,
        stdout_mode,
        stderr_mode,
        libc::STDOUT_FILENO,
        libc::STDERR_FILENO,
    );
    if let Some(errno) = outcome.stdout_errno {
        warn!(errno, error = %io::Error::from_raw_os_error(errno), "could not reopen stdout log");
    }
    if let Some(errno) = outcome.stderr_errno {
        warn!(errno, error = %io::Error::from_raw_os_error(errno), "could not reopen stderr log");
    }
    outcome
}

/// [`rotate_logs`] against arbitrary target descriptors.
pub fn reopen_pair(
    out_path: Option<&Path>,
    err_path: Option<&Path>,
    out_mode: u32,
    err_mode: u32,
    out_fd: RawFd,
    err_fd: RawFd,
) -> RotateOutcome {
    let mut outcome = RotateOutcome::default();

    if let Some(path) = out_path {
        outcome.stdout_errno = reopen_onto(path, out_mode, out_fd).err().map(errno);
    }

    if let Some(path) = err_path {
        let result = if out_path == Some(path) && outcome.stdout_errno.is_none() {
            dup_onto(out_fd, err_fd)
        } else {
            reopen_onto(path, err_mode, err_fd)
        };
        outcome.stderr_errno = result.err().map(errno);
    }

    outcome
}

/// Open `path` for appending and make `target` refer to it.
pub fn reopen_onto(path: &Path, mode: u32, target: RawFd) -> io::Result<()> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .mode(mode)
        .open(path)?;
    // The temporary descriptor closes when `file` drops; `target` stays open.
    dup_onto(file.as_raw_fd(), target)
}

fn dup_onto(src: RawFd, target: RawFd) -> io::Result<()> {
    // SAFETY: dup2 atomically replaces `target`; errors come back through errno.
    if unsafe { libc::dup2(src, target) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn errno(e: io::Error) -> i32 {
    e.raw_os_error().unwrap_or(libc::EIO)
}
