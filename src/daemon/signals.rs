//! Signal handling.
//!
//! Signals are received on a dedicated thread through `signal-hook`, so no
//! work happens in async-signal context. Terminating signals are forwarded to
//! the [`Supervisor`]; the main thread does the teardown and exits with the
//! signal number. SIGUSR1 reopens the log files instead when daemonized.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use libc::c_int;
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2};
use signal_hook::iterator::{Handle, Signals};
use tracing::{info, warn};

use super::detach::DEFAULT_LOG_MODE;
use super::logrotate::rotate_logs;
use crate::config::Config;
use crate::server::Supervisor;

/// Every signal the daemon installs a handler for.
pub const HANDLED_SIGNALS: [c_int; 5] = [SIGHUP, SIGINT, SIGTERM, SIGUSR1, SIGUSR2];

/// What a received signal does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// Log, shut down, exit with the signal number as status.
    Terminate,
    /// Reopen stdout/stderr on the log file and keep running.
    ReopenLogs,
}

impl SignalAction {
    pub fn for_signal(signum: c_int, daemonized: bool) -> Self {
        if signum == SIGUSR1 && daemonized {
            SignalAction::ReopenLogs
        } else {
            SignalAction::Terminate
        }
    }
}

/// Files stdout and stderr are reopened on during log rotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogTargets {
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub mode: u32,
}

impl LogTargets {
    /// Both streams go to the configured log file.
    pub fn from_config(config: &Config) -> Self {
        let logfile = config.logfile();
        Self {
            stdout: logfile.clone(),
            stderr: logfile,
            mode: DEFAULT_LOG_MODE,
        }
    }
}

/// Start the signal thread.
///
/// `logs` is only consulted for [`SignalAction::ReopenLogs`], i.e. when
/// `daemonized` is true. The returned handle can close the signal iterator.
pub fn install_signal_handlers(
    supervisor: Arc<Supervisor>,
    daemonized: bool,
    logs: Option<LogTargets>,
) -> io::Result<Handle> {
    let mut signals = Signals::new(HANDLED_SIGNALS)?;
    let handle = signals.handle();

    thread::Builder::new()
        .name("signals".to_string())
        .spawn(move || {
            for signum in signals.forever() {
                dispatch(signum, daemonized, &supervisor, logs.as_ref());
            }
        })?;

    Ok(handle)
}

fn dispatch(signum: c_int, daemonized: bool, supervisor: &Supervisor, logs: Option<&LogTargets>) {
    match SignalAction::for_signal(signum, daemonized) {
        SignalAction::Terminate => {
            info!(signal = signum, "terminated by signal");
            supervisor.cancel(signum);
        }
        SignalAction::ReopenLogs => {
            info!(signal = signum, "caught signal, reopening log files");
            match logs {
                Some(targets) => {
                    let outcome = rotate_logs(
                        Some(targets.stdout.as_path()),
                        Some(targets.stderr.as_path()),
                        targets.mode,
                        targets.mode,
                    );
                    if outcome.is_ok() {
                        info!(logfile = %targets.stdout.display(), "log files reopened");
                    }
                }
                None => warn!(signal = signum, "no log files configured to reopen"),
            }
        }
    }
}
