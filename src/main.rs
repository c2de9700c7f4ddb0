//! core-daemon - CORE API server supervisor
//!
//! Runs the CORE API server (TCP) with its companion UDP listener and an
//! optional auxiliary listener, or, with `-e`, asks an already running daemon
//! to execute a session file.
//!
//! CHANGELOG:
//! - 10/17/2026 - Absolute pid/log paths before detaching, flag warnings after logging init
//! - 10/16/2026 - Signal exit status, pidfile removal on exit
//! - 10/14/2026 - Initial CLI

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use core_daemon::client;
use core_daemon::codec::RegisterCodec;
use core_daemon::config::{self, CliOverrides, Config, ConfigError, DEFAULT_CONFIG_PATH};
use core_daemon::daemon::{self, DaemonOptions, LogTargets};
use core_daemon::server::{self, HandlerRegistry, Supervisor, TraceHandler};

/// CORE daemon: serves the CORE API and hosts emulation sessions.
#[derive(Parser, Debug)]
#[command(name = "core-daemon")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Read config from this file (default: /etc/core/core.conf)
    #[arg(short = 'f', long = "configfile", value_name = "PATH")]
    configfile: Option<PathBuf>,

    /// Run in the background as a daemon
    #[arg(short, long)]
    daemonize: bool,

    /// Ask a running daemon to execute this session file, then exit
    #[arg(short, long = "execute", value_name = "PATH")]
    execute: Option<PathBuf>,

    /// Log output to this file when daemonized
    #[arg(short, long, value_name = "PATH")]
    logfile: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Write the daemon's pid to this file
    #[arg(short = 'i', long, value_name = "PATH")]
    pidfile: Option<PathBuf>,

    /// Number of server threads
    #[arg(short = 't', long)]
    numthreads: Option<usize>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Debug logging
    #[arg(short = 'g', long)]
    debug: bool,

    /// Extra arguments (ignored)
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

impl Cli {
    fn into_parts(self) -> (CliOverrides, Vec<String>) {
        let overrides = CliOverrides {
            configfile: self.configfile,
            daemonize: self.daemonize,
            execfile: self.execute,
            logfile: self.logfile,
            port: self.port,
            pidfile: self.pidfile,
            numthreads: self.numthreads,
            verbose: self.verbose,
            debug: self.debug,
        };
        (overrides, self.args)
    }
}

fn main() -> ExitCode {
    let (overrides, positional) = Cli::parse().into_parts();
    let loaded = config::load(Path::new(DEFAULT_CONFIG_PATH), &overrides, positional);

    let problems = init_logging(&loaded.config);

    for warning in &loaded.warnings {
        tracing::warn!("{}", warning);
    }
    for e in &problems {
        tracing::warn!(error = %e, "using default for option");
    }
    for arg in &loaded.positional {
        tracing::warn!(argument = %arg, "ignoring command line argument");
    }

    let code = match run(loaded.config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{:#}", e);
            1
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

/// Install the subscriber. Bad logging-related flags are returned, since
/// nothing can be logged before this runs.
fn init_logging(config: &Config) -> Vec<ConfigError> {
    let mut problems = Vec::new();
    let mut flag = |key: &str| {
        config.try_flag(key).unwrap_or_else(|e| {
            problems.push(e);
            false
        })
    };
    let debug = flag("debug");
    let verbose = flag("verbose");
    let daemonize = flag("daemonize");

    let level = if debug {
        tracing::Level::TRACE
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(!daemonize)
        .init();

    problems
}

fn run(mut config: Config) -> Result<i32> {
    if let Some(file) = config.execfile() {
        return exec_remote(&config, &file);
    }

    // Already reported by init_logging
    let daemonized = config.try_flag("daemonize").unwrap_or(false);
    if !daemonized {
        return serve(&config, false);
    }

    config
        .resolve_paths()
        .context("cannot resolve pidfile and logfile paths")?;
    daemon::daemonize(&DaemonOptions::from_config(&config))?;
    let result = serve(&config, true);
    if let Err(e) = daemon::remove_pidfile(&config.pidfile()) {
        tracing::warn!(error = %e, "could not remove pidfile");
    }
    result
}

/// Run the listeners until shut down; returns the exit status.
fn serve(config: &Config, daemonized: bool) -> Result<i32> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        started = %chrono::Local::now().format("%a %b %e %H:%M:%S %Y"),
        pid = std::process::id(),
        "CORE daemon started"
    );

    let supervisor = Arc::new(Supervisor::new());
    let _shutdown = supervisor.guard();

    let logs = daemonized.then(|| LogTargets::from_config(config));
    daemon::install_signal_handlers(Arc::clone(&supervisor), daemonized, logs)
        .context("failed to install signal handlers")?;

    let handlers = HandlerRegistry::with_builtins();
    let handler = handlers.resolve(TraceHandler::KEY, config)?;
    let primary = server::start(config, handler, &handlers, &supervisor)?;

    tracing::debug!(
        listeners = supervisor.len(),
        numthreads = config.num_threads(),
        "serving"
    );
    primary.serve_forever();

    supervisor.shutdown();

    let code = supervisor.exit_code();
    tracing::info!(status = code, "CORE daemon exiting");
    Ok(code)
}

fn exec_remote(config: &Config, file: &Path) -> Result<i32> {
    let host = config.listen_addr();
    let port = config.port();
    let code = client::request_execute(host, port, file, &RegisterCodec)
        .with_context(|| format!("failed to send execute request to {}:{}", host, port))?;
    println!("execute request for {} sent to {}:{}", file.display(), host, port);
    Ok(code)
}
