//! Process lifecycle: detaching, signals, log rotation.
//!
//! CHANGELOG:
//! - 10/16/2026 - Signals forward to the supervisor instead of exiting directly
//! - 10/14/2026 - Initial module structure

pub mod detach;
pub mod logrotate;
pub mod signals;

use std::io;
use std::os::fd::RawFd;

pub use detach::{daemonize, remove_pidfile, DaemonError, DaemonOptions};
pub use logrotate::{rotate_logs, RotateOutcome};
pub use signals::{install_signal_handlers, LogTargets, SignalAction, HANDLED_SIGNALS};

/// Set `FD_CLOEXEC` on a descriptor so it does not leak into exec'd children.
pub fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: fcntl on a caller-provided descriptor; failure is reported via errno.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_set_cloexec() {
        let file = tempfile::tempfile().unwrap();
        let fd = file.as_raw_fd();
        set_cloexec(fd).unwrap();
        let flags = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        assert_ne!(flags & libc::FD_CLOEXEC, 0);
    }

    #[test]
    fn test_set_cloexec_bad_fd() {
        assert!(set_cloexec(-1).is_err());
    }
}
