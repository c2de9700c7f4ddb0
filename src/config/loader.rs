//! Layered config merge: defaults < legacy sections < `[core-daemon]` < CLI.

use std::path::{Path, PathBuf};

use super::legacy::{migrate, LEGACY_SECTIONS};
use super::{expand_path, ini, Config, CANONICAL_SECTION};

/// Options given on the command line. `None` (or `false` for flags) means the
/// option was not set and must not override the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub configfile: Option<PathBuf>,
    pub daemonize: bool,
    pub execfile: Option<PathBuf>,
    pub logfile: Option<PathBuf>,
    pub port: Option<u16>,
    pub pidfile: Option<PathBuf>,
    pub numthreads: Option<usize>,
    pub verbose: bool,
    pub debug: bool,
}

impl CliOverrides {
    /// Explicitly set options as config entries.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        let mut out = Vec::new();
        let path = |p: &PathBuf| p.to_string_lossy().into_owned();

        if self.daemonize {
            out.push(("daemonize", "True".to_string()));
        }
        if let Some(p) = &self.execfile {
            out.push(("execfile", path(p)));
        }
        if let Some(p) = &self.logfile {
            out.push(("logfile", path(p)));
        }
        if let Some(port) = self.port {
            out.push(("port", port.to_string()));
        }
        if let Some(p) = &self.pidfile {
            out.push(("pidfile", path(p)));
        }
        if let Some(n) = self.numthreads {
            out.push(("numthreads", n.to_string()));
        }
        if self.verbose {
            out.push(("verbose", "True".to_string()));
        }
        if self.debug {
            out.push(("debug", "True".to_string()));
        }

        out.retain(|(_, v)| !v.is_empty());
        out
    }
}

/// Result of [`load`].
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: Config,
    /// Leftover positional arguments, never interpreted as config.
    pub positional: Vec<String>,
    /// Non-fatal problems found while loading (missing or malformed file).
    /// Collected rather than logged because logging is configured from the
    /// merged result.
    pub warnings: Vec<String>,
    /// File that was consulted.
    pub path: PathBuf,
}

/// Merge defaults, the config file and command-line overrides.
pub fn load(default_path: &Path, cli: &CliOverrides, positional: Vec<String>) -> LoadedConfig {
    let path = cli
        .configfile
        .as_deref()
        .map(|p| expand_path(&p.to_string_lossy()))
        .unwrap_or_else(|| default_path.to_path_buf());

    let mut config = Config::default();
    let mut warnings = Vec::new();

    match std::fs::read_to_string(&path) {
        Ok(text) => {
            if let Err(e) = merge_file(&mut config, &text) {
                warnings.push(format!(
                    "ignoring malformed config file {}: {}",
                    path.display(),
                    e
                ));
            }
        }
        Err(e) => warnings.push(format!(
            "config file {} not read ({}), using defaults",
            path.display(),
            e
        )),
    }

    for (key, value) in cli.entries() {
        config.set(key, value);
    }

    LoadedConfig {
        config,
        positional,
        warnings,
        path,
    }
}

/// Apply the file's legacy and canonical sections on top of `config`.
///
/// The document is fully parsed before anything is applied, so a malformed
/// file leaves `config` untouched.
pub fn merge_file(config: &mut Config, text: &str) -> Result<(), ini::IniError> {
    let doc = ini::parse(text)?;

    for legacy in LEGACY_SECTIONS {
        if let Some(section) = doc.section(legacy.section) {
            for (key, value) in migrate(legacy, section.entries()) {
                config.set(key, value);
            }
        }
    }

    if let Some(section) = doc.section(CANONICAL_SECTION) {
        for (key, value) in section.entries() {
            config.set(key, value);
        }
    }

    Ok(())
}
