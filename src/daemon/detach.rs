//! Detaching from the terminal: double fork, pidfile, stdio redirection.
//!
//! Must run before any thread or listener is started, since only the calling
//! thread survives the fork.

use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use daemonize::Daemonize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

/// Highest descriptor considered when closing inherited descriptors.
pub const DEFAULT_MAX_FD: RawFd = 1024;

/// Mode for newly created log files.
pub const DEFAULT_LOG_MODE: u32 = 0o644;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to daemonize: {0}")]
    Detach(#[from] daemonize::Error),
}

/// How to detach.
#[derive(Debug, Clone)]
pub struct DaemonOptions {
    pub pidfile: PathBuf,
    /// Receives both stdout and stderr.
    pub logfile: PathBuf,
    pub log_mode: u32,
    pub working_directory: PathBuf,
    pub umask: u32,
    /// Close inherited descriptors `3..max_fd` (except `keep_fds`) before forking.
    pub close_fds: bool,
    pub keep_fds: Vec<RawFd>,
    pub max_fd: RawFd,
}

impl DaemonOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            pidfile: config.pidfile(),
            logfile: config.logfile(),
            log_mode: DEFAULT_LOG_MODE,
            working_directory: PathBuf::from("/"),
            umask: 0o022,
            close_fds: false,
            keep_fds: Vec::new(),
            max_fd: DEFAULT_MAX_FD,
        }
    }
}

/// Detach from the controlling terminal.
///
/// The parent process exits inside this call; only the daemon returns.
/// Stdin is redirected to `/dev/null`, stdout and stderr to the log file
/// (sharing one file description), and the daemon's pid is written to the
/// pidfile.
pub fn daemonize(opts: &DaemonOptions) -> Result<(), DaemonError> {
    let stdout = open_log(&opts.logfile, opts.log_mode)?;
    let stderr = stdout.try_clone().map_err(|source| DaemonError::LogFile {
        path: opts.logfile.clone(),
        source,
    })?;

    if opts.close_fds {
        let mut keep = opts.keep_fds.clone();
        keep.extend([stdout.as_raw_fd(), stderr.as_raw_fd()]);
        close_descriptors(3, opts.max_fd, &keep);
    }

    Daemonize::new()
        .pid_file(&opts.pidfile)
        .working_directory(&opts.working_directory)
        .umask(opts.umask)
        .stdout(stdout)
        .stderr(stderr)
        .start()?;

    debug!(pid = std::process::id(), pidfile = %opts.pidfile.display(), "daemonized");
    Ok(())
}

/// Open a log file for appending, creating it with `mode`.
pub fn open_log(path: &Path, mode: u32) -> Result<File, DaemonError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .mode(mode)
        .open(path)
        .map_err(|source| DaemonError::LogFile {
            path: path.to_path_buf(),
            source,
        })
}

/// Close every descriptor in `from..max` not listed in `keep`.
pub fn close_descriptors(from: RawFd, max: RawFd, keep: &[RawFd]) {
    for fd in from..max {
        if keep.contains(&fd) {
            continue;
        }
        // SAFETY: closing descriptors this process may hold; EBADF is ignored.
        unsafe {
            libc::close(fd);
        }
    }
}

/// Remove the pidfile if it still names this process.
///
/// Returns whether a file was removed.
pub fn remove_pidfile(path: &Path) -> io::Result<bool> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };
    if contents.trim().parse::<u32>().ok() != Some(std::process::id()) {
        return Ok(false);
    }
    std::fs::remove_file(path)?;
    Ok(true)
}
